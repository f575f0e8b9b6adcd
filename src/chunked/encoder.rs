use std::fmt;
use std::io;

use log::{error, trace};

/// A byte transform applied to outgoing data before it is framed.
pub type Transliterator = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Where encoded bytes go.
///
/// Implementations either write straight to the transport or, off the reactor
/// thread, queue the bytes as deferred work.
pub trait ChunkSink: Send {
    /// Hand `bytes` to the transport path.
    fn emit(&mut self, bytes: Vec<u8>) -> io::Result<()>;
}

impl ChunkSink for Vec<u8> {
    fn emit(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        self.extend_from_slice(&bytes);
        Ok(())
    }
}

impl<S: ChunkSink + ?Sized> ChunkSink for Box<S> {
    fn emit(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        (**self).emit(bytes)
    }
}

/// An encoder for chunked encoding.
///
/// Small writes are coalesced in a buffer of fixed capacity; a write larger
/// than the capacity goes out as its own chunk. After the sink fails once
/// every later write is discarded.
pub struct ChunkedWriter<S> {
    sink: S,
    buffer: Vec<u8>,
    capacity: usize,
    transliterator: Option<Transliterator>,
    failed: bool,
    finished: bool,
    trace: bool,
}

impl<S: ChunkSink> ChunkedWriter<S> {
    /// Create a writer buffering up to `capacity` bytes per chunk.
    pub fn new(sink: S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sink,
            buffer: Vec::with_capacity(capacity),
            capacity,
            transliterator: None,
            failed: false,
            finished: false,
            trace: false,
        }
    }

    /// Transform every later write with `transliterator`.
    pub fn set_transliterator(&mut self, transliterator: Transliterator) {
        self.transliterator = Some(transliterator);
    }

    /// `bytes` as a write would send them, without writing.
    pub(crate) fn transliterated(&mut self, bytes: &[u8]) -> Vec<u8> {
        match self.transliterator.as_mut() {
            Some(transliterate) => transliterate(bytes),
            None => bytes.to_vec(),
        }
    }

    pub(crate) fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Buffer or emit `bytes`.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.failed || self.finished {
            return;
        }

        let converted;
        let data = match self.transliterator.as_mut() {
            Some(transliterate) => {
                converted = transliterate(bytes);
                converted.as_slice()
            }
            None => bytes,
        };

        if data.len() > self.capacity {
            self.flush_buffer();
            self.emit_chunk(data);
        } else if self.buffer.len() + data.len() >= self.capacity {
            self.buffer.extend_from_slice(data);
            self.flush_buffer();
        } else {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Flush what is buffered and write the terminal chunk.
    ///
    /// A no-op once the writer failed or was finished.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.flush_buffer();
        self.emit_raw(b"0\r\n\r\n".to_vec());
        self.finished = true;
    }

    /// Whether the sink has failed.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Whether [`finish`](Self::finish) ran.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Send unframed bytes through the sink, honoring the error state.
    pub(crate) fn emit_raw(&mut self, bytes: Vec<u8>) {
        if self.failed {
            return;
        }
        if let Err(err) = self.sink.emit(bytes) {
            error!("chunked write failed, discarding the rest of the body: {}", err);
            self.failed = true;
            self.buffer.clear();
        }
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
        self.buffer = Vec::new();
    }

    /// The sink this writer emits to.
    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    /// Consume the writer and return its sink.
    pub fn into_inner(self) -> S {
        self.sink
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let buffered = std::mem::take(&mut self.buffer);
        self.emit_chunk(&buffered);
        self.buffer = buffered;
        self.buffer.clear();
    }

    fn emit_chunk(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if self.trace {
            trace!("emitting chunk of {} bytes", data.len());
        }
        let head = format!("{:X}\r\n", data.len());
        let mut chunk = Vec::with_capacity(head.len() + data.len() + 2);
        chunk.extend_from_slice(head.as_bytes());
        chunk.extend_from_slice(data);
        chunk.extend_from_slice(b"\r\n");
        self.emit_raw(chunk);
    }
}

impl<S: ChunkSink> io::Write for ChunkedWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ChunkedWriter::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S> fmt::Debug for ChunkedWriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedWriter")
            .field("buffered", &self.buffer.len())
            .field("capacity", &self.capacity)
            .field("failed", &self.failed)
            .field("finished", &self.finished)
            .finish()
    }
}
