#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use reactor_h1::auth::CipherProvider;
use reactor_h1::reactor::{Scheduler, Transport, Work};
use reactor_h1::Engine;

#[derive(Default)]
struct Pipe {
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<u8>,
    eof: bool,
    closes: usize,
    fail_writes: bool,
}

/// An in-memory transport. Clones share the same pipe, so a test keeps one
/// handle while the engine owns the other.
#[derive(Clone, Default)]
pub struct MemoryTransport(Arc<Mutex<Pipe>>);

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the engine's next read.
    pub fn push(&self, bytes: impl AsRef<[u8]>) {
        self.0.lock().unwrap().inbound.push_back(bytes.as_ref().to_vec());
    }

    /// Report end of stream once the queued reads are consumed.
    pub fn hang_up(&self) {
        self.0.lock().unwrap().eof = true;
    }

    pub fn fail_writes(&self) {
        self.0.lock().unwrap().fail_writes = true;
    }

    /// Everything the engine wrote so far, removed from the pipe.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().unwrap().outbound)
    }

    pub fn take_text(&self) -> String {
        String::from_utf8(self.take_output()).unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn close_count(&self) -> usize {
        self.0.lock().unwrap().closes
    }
}

impl Transport for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.0.lock().unwrap();
        match pipe.inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    pipe.inbound.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if pipe.eof => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut pipe = self.0.lock().unwrap();
        if pipe.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        pipe.outbound.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn close(&mut self) {
        self.0.lock().unwrap().closes += 1;
    }
}

/// A scheduler the test steps by hand.
#[derive(Default)]
pub struct ManualScheduler {
    work: Mutex<VecDeque<Work>>,
    subtasks: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending_subtasks(&self) -> usize {
        self.subtasks.lock().unwrap().len()
    }

    /// Run every queued subtask on the calling thread.
    pub fn run_subtasks(&self) {
        loop {
            let task = self.subtasks.lock().unwrap().pop_front();
            match task {
                Some(task) => task(),
                None => return,
            }
        }
    }

    /// Take every queued work item.
    pub fn take_work(&self) -> Vec<Work> {
        self.work.lock().unwrap().drain(..).collect()
    }

    /// Run subtasks and dispatch work until both queues are empty.
    pub fn pump(&self, engine: &mut Engine) {
        loop {
            self.run_subtasks();
            let work = self.work.lock().unwrap().pop_front();
            match work {
                Some(work) => engine.dispatch(work),
                None if self.pending_subtasks() == 0 => return,
                None => {}
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn enqueue(&self, work: Work) {
        self.work.lock().unwrap().push_back(work);
    }

    fn run_subtask(&self, task: Box<dyn FnOnce() + Send>) {
        self.subtasks.lock().unwrap().push_back(task);
    }
}

/// Repeating-key XOR, enough to seal session tokens in tests.
pub struct Xor;

impl CipherProvider for Xor {
    fn encipher(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, String> {
        Ok(plaintext
            .iter()
            .zip(key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect())
    }

    fn decipher(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, String> {
        self.encipher(key, ciphertext)
    }
}

/// Drop `date` header lines so responses compare byte for byte.
pub fn without_date(response: &str) -> String {
    response
        .split_inclusive("\r\n")
        .filter(|line| !line.starts_with("date: "))
        .collect()
}

/// Decode a chunked body, returning the payload and the bytes after it.
pub fn decode_chunked(mut wire: &[u8]) -> (Vec<u8>, &[u8]) {
    let mut body = Vec::new();
    loop {
        let line_end = wire.windows(2).position(|w| w == b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&wire[..line_end]).unwrap(), 16).unwrap();
        wire = &wire[line_end + 2..];
        if size == 0 {
            assert_eq!(&wire[..2], b"\r\n");
            return (body, &wire[2..]);
        }
        body.extend_from_slice(&wire[..size]);
        assert_eq!(&wire[size..size + 2], b"\r\n");
        wire = &wire[size + 2..];
    }
}
