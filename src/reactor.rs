//! Seams to the host's transport and event loop.
//!
//! The engine never blocks on I/O of its own. The host reports readiness and
//! runs the [`Work`] items the engine enqueues through a [`Scheduler`]; bytes
//! produced off the reactor thread travel back as [`Work::Emit`].

use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_io::Timer;
use futures_lite::future;
use log::error;

use crate::chunked::ChunkSink;
use crate::conversation::ConversationId;

/// A byte stream owned by one conversation.
pub trait Transport: Send {
    /// Read into `buf`. `Ok(0)` is end of stream; `WouldBlock` means no data yet.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some prefix of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Release the stream.
    fn close(&mut self);
}

impl Transport for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        io::Write::write(self, bytes)
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// Write all of `bytes`, retrying interrupted writes.
pub(crate) fn write_all(transport: &mut dyn Transport, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        match transport.write(bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Deferred work for the reactor thread.
#[derive(Debug)]
pub enum Work {
    /// Decide whether the conversation may close now.
    ConsiderClose(ConversationId),
    /// Close the conversation and release it. Enqueued at most once.
    Close(ConversationId),
    /// Write bytes produced by a subtask.
    Emit {
        /// Target conversation.
        conversation: ConversationId,
        /// Encoded response bytes.
        bytes: Vec<u8>,
    },
    /// A subtask finished serving a request.
    SubtaskFinished {
        /// The conversation it served.
        conversation: ConversationId,
    },
}

/// The host's event loop, as seen by the engine.
pub trait Scheduler: Send + Sync {
    /// Queue `work` for the reactor thread.
    fn enqueue(&self, work: Work);

    /// Run `task` off the reactor thread.
    fn run_subtask(&self, task: Box<dyn FnOnce() + Send>);
}

/// A [`Scheduler`] built on an unbounded channel and the global executor's
/// blocking pool.
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    sender: Sender<Work>,
    receiver: Receiver<Work>,
    poll_timeout: Duration,
}

impl ChannelScheduler {
    /// Create a scheduler whose [`next_work`](Self::next_work) waits at most
    /// `poll_timeout`.
    pub fn new(poll_timeout: Duration) -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            poll_timeout,
        }
    }

    /// Wait for the next work item.
    pub async fn recv_work(&self) -> Option<Work> {
        self.receiver.recv().await.ok()
    }

    /// Block until a work item arrives or the poll timeout passes.
    pub fn next_work(&self) -> Option<Work> {
        future::block_on(future::or(self.recv_work(), async {
            Timer::after(self.poll_timeout).await;
            None
        }))
    }

    /// Take a work item if one is queued.
    pub fn try_work(&self) -> Option<Work> {
        self.receiver.try_recv().ok()
    }

    /// Number of queued work items.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no work is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Scheduler for ChannelScheduler {
    fn enqueue(&self, work: Work) {
        if let Err(err) = self.sender.try_send(work) {
            error!("work queue closed, dropping {:?}", err.into_inner());
        }
    }

    fn run_subtask(&self, task: Box<dyn FnOnce() + Send>) {
        async_global_executor::spawn_blocking(task).detach();
    }
}

/// Writes straight to the transport; used on the reactor thread.
pub(crate) struct TransportSink<'a> {
    transport: &'a mut dyn Transport,
}

impl<'a> TransportSink<'a> {
    pub(crate) fn new(transport: &'a mut dyn Transport) -> Self {
        Self { transport }
    }
}

impl ChunkSink for TransportSink<'_> {
    fn emit(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        write_all(self.transport, &bytes)
    }
}

/// Queues bytes as [`Work::Emit`]; used by subtasks.
pub(crate) struct DeferredSink {
    conversation: ConversationId,
    scheduler: Arc<dyn Scheduler>,
}

impl DeferredSink {
    pub(crate) fn new(conversation: ConversationId, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            conversation,
            scheduler,
        }
    }
}

impl ChunkSink for DeferredSink {
    fn emit(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        self.scheduler.enqueue(Work::Emit {
            conversation: self.conversation,
            bytes,
        });
        Ok(())
    }
}

impl fmt::Debug for DeferredSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSink")
            .field("conversation", &self.conversation)
            .finish()
    }
}
