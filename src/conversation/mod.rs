//! Per-connection state.
//!
//! A conversation owns its transport, the request parser, the WebSocket session
//! once upgraded, and the close-lifecycle word that subtasks update
//! concurrently.

mod state;

use std::fmt;
use std::sync::Arc;

pub use state::{ConversationState, SharedState};

use crate::reactor::Transport;
use crate::websocket::Session;
use crate::{RequestParser, ServerOptions};

/// Identifies a conversation within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(u64);

impl ConversationId {
    /// Wrap a raw identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Conversation {
    pub(crate) id: ConversationId,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) parser: RequestParser,
    pub(crate) session: Option<Session>,
    /// Bytes read past an upgrade request, waiting for the session.
    pub(crate) pending: Vec<u8>,
    pub(crate) request_count: u64,
    pub(crate) keep_alive: bool,
    /// A subtask owns the current request; later requests wait.
    pub(crate) in_flight: bool,
    pub(crate) error_answered: bool,
    /// A write failed; nothing more is sent.
    pub(crate) broken: bool,
    pub(crate) state: Arc<SharedState>,
}

impl Conversation {
    pub(crate) fn new(id: ConversationId, transport: Box<dyn Transport>, options: &ServerOptions) -> Self {
        Self {
            id,
            transport,
            parser: RequestParser::new(options.clone()),
            session: None,
            pending: Vec::new(),
            request_count: 0,
            keep_alive: true,
            in_flight: false,
            error_answered: false,
            broken: false,
            state: Arc::new(SharedState::new()),
        }
    }

    /// Whether new requests may be taken from the parser.
    pub(crate) fn accepts_requests(&self) -> bool {
        !self.in_flight && self.session.is_none() && !self.state.load().should_close
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("requests", &self.request_count)
            .field("keep_alive", &self.keep_alive)
            .field("in_flight", &self.in_flight)
            .field("session", &self.session)
            .field("state", &self.state.load())
            .finish()
    }
}
