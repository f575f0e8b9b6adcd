//! Configuration handed to each component at construction.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::{MAX_HEADERS, MAX_HEAD_LENGTH};

/// Configure the engine.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Longest accepted request target, in bytes.
    pub max_uri_length: usize,
    /// Longest accepted header name, in bytes.
    pub max_header_name: usize,
    /// Longest accepted header value, in bytes.
    pub max_header_value: usize,
    /// Most headers accepted on one request.
    pub max_headers: usize,
    /// Largest accepted `Content-Length` or accumulated chunked body.
    pub max_body_size: u64,
    /// Largest accepted single chunk.
    pub max_chunk_size: u64,
    /// Capacity of the chunked writer's internal buffer.
    pub chunk_capacity: usize,
    /// Size of the buffer used for one transport read.
    pub read_buffer_size: usize,
    /// Largest accepted WebSocket frame payload.
    pub max_frame_payload: u64,
    /// How long the background poll loop waits for work before returning.
    pub poll_timeout: Duration,
    /// Realm announced on `401` answers.
    pub realm: String,
    /// Cookie carrying the native session token.
    pub session_cookie: String,
    /// Cookie that may carry a bearer token.
    pub bearer_cookie: String,
    /// Whether passwords keep their case when verified.
    pub mixed_case_passwords: bool,
    /// Per-area trace toggles.
    pub trace: TraceOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_uri_length: MAX_HEAD_LENGTH,
            max_header_name: 256,
            max_header_value: MAX_HEAD_LENGTH,
            max_headers: MAX_HEADERS,
            max_body_size: 16 * 1024 * 1024,
            max_chunk_size: 0x0FFF_FFFF,
            chunk_capacity: 4 * 1024,
            read_buffer_size: 8 * 1024,
            max_frame_payload: 16 * 1024 * 1024,
            poll_timeout: Duration::from_millis(500),
            realm: String::from("reactor-h1"),
            session_cookie: String::from("h1SessionToken"),
            bearer_cookie: String::from("apimlAuthenticationToken"),
            mixed_case_passwords: false,
            trace: TraceOptions::default(),
        }
    }
}

/// Per-area verbosity.
///
/// Each component only emits `trace!` records when its own flag is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceOptions {
    /// Request parser state transitions.
    pub parser: bool,
    /// Chunk emission.
    pub chunked: bool,
    /// WebSocket framing.
    pub websocket: bool,
    /// Authentication decisions.
    pub auth: bool,
    /// Conversation lifecycle and close protocol.
    pub conversation: bool,
}

impl TraceOptions {
    /// Every area enabled.
    pub fn all() -> Self {
        Self {
            parser: true,
            chunked: true,
            websocket: true,
            auth: true,
            conversation: true,
        }
    }
}

/// How long a session token stays valid after it was issued.
///
/// `None` windows never expire.
#[derive(Debug, Clone, Default)]
pub struct SessionPolicy {
    default_window: Option<Duration>,
    users: HashMap<String, Option<Duration>>,
    groups: Vec<GroupWindow>,
}

#[derive(Debug, Clone)]
struct GroupWindow {
    name: String,
    members: HashSet<String>,
    window: Option<Duration>,
}

impl SessionPolicy {
    /// Policy where every token lives for `window`.
    pub fn new(default_window: Option<Duration>) -> Self {
        Self {
            default_window,
            ..Self::default()
        }
    }

    /// Override the window for one user.
    pub fn with_user(mut self, username: &str, window: Option<Duration>) -> Self {
        self.users.insert(username.to_ascii_uppercase(), window);
        self
    }

    /// Override the window for every member of a group.
    pub fn with_group<I, S>(mut self, name: &str, members: I, window: Option<Duration>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.groups.push(GroupWindow {
            name: name.to_owned(),
            members: members
                .into_iter()
                .map(|m| m.as_ref().to_ascii_uppercase())
                .collect(),
            window,
        });
        self
    }

    /// The validity window for `username`.
    ///
    /// A user override wins; otherwise the longest-lived group the user belongs
    /// to; otherwise the default.
    pub fn window_for(&self, username: &str) -> Option<Duration> {
        self.resolve(username).0
    }

    /// The group whose window applies to `username`, if a group decided it.
    pub fn window_group(&self, username: &str) -> Option<&str> {
        self.resolve(username).1
    }

    fn resolve(&self, username: &str) -> (Option<Duration>, Option<&str>) {
        let key = username.to_ascii_uppercase();
        if let Some(window) = self.users.get(&key) {
            return (*window, None);
        }

        let mut best: Option<(Option<Duration>, &str)> = None;
        for group in self.groups.iter().filter(|g| g.members.contains(&key)) {
            let longer = match best {
                None => true,
                Some((None, _)) => false,
                Some((Some(a), _)) => group.window.map_or(true, |b| b > a),
            };
            if longer {
                best = Some((group.window, group.name.as_str()));
            }
        }

        match best {
            Some((window, name)) => (window, Some(name)),
            None => (self.default_window, None),
        }
    }
}
