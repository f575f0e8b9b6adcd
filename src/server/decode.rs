//! Decode HTTP requests on the server.
//!
//! The parser is a byte-driven state machine. It owns no I/O: the caller hands
//! it whatever bytes the transport produced, in fragments of any size, and
//! collects completed requests from its queue.

use std::collections::VecDeque;
use std::str::FromStr;

use http_types::{Method, Version};
use log::trace;

use crate::error::{ParseError, ParseErrorKind};
use crate::{Request, ServerOptions};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const SP: u8 = b' ';
const HTAB: u8 = b'\t';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Method,
    Gap1,
    Uri,
    Gap2,
    Version,
    RequestCr,
    HeaderCr,
    HeaderName,
    HeaderGap1,
    HeaderValue,
    HeaderGap2,
    EndCr,
    FixedBody { remaining: u64 },
    ChunkSize { digits: usize },
    ChunkExtension,
    ChunkSizeCr,
    ChunkData { remaining: u64 },
    ChunkDataCr,
    ChunkDataLf,
    TrailerCr,
    TrailerLf,
    /// A WebSocket upgrade completed; the rest of the stream is not HTTP.
    Upgraded,
    Failed(ParseError),
}

/// Incremental HTTP/1.1 request parser.
#[derive(Debug)]
pub struct RequestParser {
    state: State,
    options: ServerOptions,
    method: Vec<u8>,
    token: Vec<u8>,
    header_name: Vec<u8>,
    header_value: Vec<u8>,
    chunk_size: u64,
    request: Option<Request>,
    completed: VecDeque<Request>,
    parsed: u64,
}

impl RequestParser {
    /// Create a parser enforcing the limits in `options`.
    pub fn new(options: ServerOptions) -> Self {
        Self {
            state: State::Method,
            options,
            method: Vec::new(),
            token: Vec::new(),
            header_name: Vec::new(),
            header_value: Vec::new(),
            chunk_size: 0,
            request: None,
            completed: VecDeque::new(),
            parsed: 0,
        }
    }

    /// Feed newly read bytes to the parser.
    ///
    /// Returns the number of bytes consumed. This is the full fragment unless a
    /// WebSocket upgrade request completed inside it, in which case parsing
    /// stops right after that request and the remainder belongs to the
    /// WebSocket stream.
    ///
    /// Any number of requests may complete during one call; they are queued in
    /// arrival order. Once an error is reported every later call reports it
    /// again.
    pub fn process_fragment(&mut self, bytes: &[u8]) -> Result<usize, ParseError> {
        let mut pos = 0;
        while pos < bytes.len() {
            match self.state {
                State::Failed(err) => return Err(err),
                State::Upgraded => return Ok(pos),
                State::FixedBody { remaining } => {
                    let take = remaining.min((bytes.len() - pos) as u64) as usize;
                    self.append_body(&bytes[pos..pos + take]);
                    pos += take;
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.complete();
                    } else {
                        self.state = State::FixedBody { remaining };
                    }
                }
                State::ChunkData { remaining } => {
                    let take = remaining.min((bytes.len() - pos) as u64) as usize;
                    self.append_body(&bytes[pos..pos + take]);
                    pos += take;
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        State::ChunkDataCr
                    } else {
                        State::ChunkData { remaining }
                    };
                }
                _ => {
                    if let Err(kind) = self.step(bytes[pos]) {
                        let err = ParseError::new(kind);
                        if self.options.trace.parser {
                            trace!("request parser failed at {:?}: {}", self.state, err);
                        }
                        self.state = State::Failed(err);
                        return Err(err);
                    }
                    pos += 1;
                }
            }
        }

        match self.state {
            State::Failed(err) => Err(err),
            _ => Ok(pos),
        }
    }

    /// Take the oldest completed request.
    pub fn pop_request(&mut self) -> Option<Request> {
        self.completed.pop_front()
    }

    /// Number of completed requests waiting to be taken.
    pub fn pending(&self) -> usize {
        self.completed.len()
    }

    /// The error that stopped the parser, if any.
    pub fn error(&self) -> Option<ParseError> {
        match self.state {
            State::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the parser is between requests, with nothing partially read.
    pub fn is_idle(&self) -> bool {
        self.state == State::Method && self.method.is_empty()
    }

    /// Whether a WebSocket upgrade request has been parsed.
    pub fn is_upgraded(&self) -> bool {
        self.state == State::Upgraded
    }

    fn step(&mut self, byte: u8) -> Result<(), ParseErrorKind> {
        let before = self.state;
        match self.state {
            State::Method => match byte {
                b'A'..=b'Z' | b'-' | b'_' => {
                    if self.method.len() >= 32 {
                        return Err(ParseErrorKind::UnknownMethod);
                    }
                    self.method.push(byte);
                }
                SP if !self.method.is_empty() => self.state = State::Gap1,
                // tolerate stray CRLF between pipelined requests
                CR | LF if self.method.is_empty() => {}
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::Gap1 => match byte {
                SP => {}
                CR | LF | HTAB => return Err(ParseErrorKind::MalformedLine),
                _ => {
                    self.start_request()?;
                    self.state = State::Uri;
                    self.push_uri(byte)?;
                }
            },
            State::Uri => match byte {
                SP => self.state = State::Gap2,
                CR | LF | HTAB => return Err(ParseErrorKind::MalformedLine),
                0x21..=0x7e | 0x80..=0xff => self.push_uri(byte)?,
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::Gap2 => match byte {
                SP => {}
                b'H' => {
                    self.finish_uri()?;
                    self.token.push(byte);
                    self.state = State::Version;
                }
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::Version => match byte {
                CR => {
                    self.finish_version()?;
                    self.state = State::RequestCr;
                }
                b'H' | b'T' | b'P' | b'/' | b'.' | b'0'..=b'9' if self.token.len() < 8 => {
                    self.token.push(byte)
                }
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::RequestCr => match byte {
                LF => self.state = State::HeaderCr,
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::HeaderCr => match byte {
                CR => self.state = State::EndCr,
                _ if is_token(byte) => {
                    self.header_name.push(byte);
                    self.state = State::HeaderName;
                }
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::HeaderName => match byte {
                b':' => self.state = State::HeaderGap1,
                _ if is_token(byte) => {
                    if self.header_name.len() >= self.options.max_header_name {
                        return Err(ParseErrorKind::HeaderTooLarge);
                    }
                    self.header_name.push(byte);
                }
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::HeaderGap1 => match byte {
                SP | HTAB => {}
                CR => self.state = State::HeaderGap2,
                LF => return Err(ParseErrorKind::MalformedLine),
                _ => {
                    self.push_header_value(byte)?;
                    self.state = State::HeaderValue;
                }
            },
            State::HeaderValue => match byte {
                CR => self.state = State::HeaderGap2,
                LF => return Err(ParseErrorKind::MalformedLine),
                _ => self.push_header_value(byte)?,
            },
            State::HeaderGap2 => match byte {
                LF => {
                    self.finish_header()?;
                    self.state = State::HeaderCr;
                }
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::EndCr => match byte {
                LF => self.finish_head()?,
                _ => return Err(ParseErrorKind::MalformedLine),
            },
            State::ChunkSize { digits } => match byte {
                b';' if digits > 0 => self.state = State::ChunkExtension,
                CR if digits > 0 => self.state = State::ChunkSizeCr,
                _ => {
                    let digit = hex_value(byte).ok_or(ParseErrorKind::InvalidChunkSize)?;
                    let max = self.options.max_chunk_size;
                    if self.chunk_size > max.saturating_sub(digit) / 16 {
                        return Err(ParseErrorKind::ChunkTooLarge);
                    }
                    self.chunk_size = self.chunk_size * 16 + digit;
                    self.state = State::ChunkSize { digits: digits + 1 };
                }
            },
            State::ChunkExtension => match byte {
                CR => self.state = State::ChunkSizeCr,
                LF => return Err(ParseErrorKind::InvalidChunkSize),
                _ => {}
            },
            State::ChunkSizeCr => match byte {
                LF => {
                    let size = std::mem::take(&mut self.chunk_size);
                    if size == 0 {
                        self.state = State::TrailerCr;
                    } else {
                        let body = self.body_len() + size;
                        if body > self.options.max_body_size {
                            return Err(ParseErrorKind::BodyTooLarge);
                        }
                        self.state = State::ChunkData { remaining: size };
                    }
                }
                _ => return Err(ParseErrorKind::InvalidChunkSize),
            },
            State::ChunkDataCr => match byte {
                CR => self.state = State::ChunkDataLf,
                _ => return Err(ParseErrorKind::MissingChunkTerminator),
            },
            State::ChunkDataLf => match byte {
                LF => self.state = State::ChunkSize { digits: 0 },
                _ => return Err(ParseErrorKind::MissingChunkTerminator),
            },
            State::TrailerCr => match byte {
                CR => self.state = State::TrailerLf,
                _ => return Err(ParseErrorKind::TrailerUnsupported),
            },
            State::TrailerLf => match byte {
                LF => self.complete(),
                _ => return Err(ParseErrorKind::TrailerUnsupported),
            },
            State::FixedBody { .. }
            | State::ChunkData { .. }
            | State::Upgraded
            | State::Failed(_) => unreachable!("bulk states are handled by process_fragment"),
        }
        if self.options.trace.parser && before != self.state {
            trace!("request parser {:?} -> {:?}", before, self.state);
        }
        Ok(())
    }

    fn start_request(&mut self) -> Result<(), ParseErrorKind> {
        let raw = std::str::from_utf8(&self.method).map_err(|_| ParseErrorKind::MalformedLine)?;
        let method = Method::from_str(raw).map_err(|_| ParseErrorKind::UnknownMethod)?;
        self.method.clear();
        self.request = Some(Request::new(method, String::new(), Version::Http1_1));
        Ok(())
    }

    fn push_uri(&mut self, byte: u8) -> Result<(), ParseErrorKind> {
        if self.token.len() >= self.options.max_uri_length {
            return Err(ParseErrorKind::UriTooLong);
        }
        self.token.push(byte);
        Ok(())
    }

    fn finish_uri(&mut self) -> Result<(), ParseErrorKind> {
        let uri = String::from_utf8(std::mem::take(&mut self.token))
            .map_err(|_| ParseErrorKind::InvalidPath)?;
        let req = self.current()?;
        req.uri = uri;
        req.derive_target().map_err(|_| ParseErrorKind::InvalidPath)
    }

    fn finish_version(&mut self) -> Result<(), ParseErrorKind> {
        let version = match self.token.as_slice() {
            b"HTTP/1.1" => Version::Http1_1,
            b"HTTP/1.0" => Version::Http1_0,
            v if v.starts_with(b"HTTP/") => return Err(ParseErrorKind::UnsupportedVersion),
            _ => return Err(ParseErrorKind::MalformedLine),
        };
        self.token.clear();
        let req = self.current()?;
        req.version = version;
        req.keep_alive = version == Version::Http1_1;
        Ok(())
    }

    fn push_header_value(&mut self, byte: u8) -> Result<(), ParseErrorKind> {
        if self.header_value.len() >= self.options.max_header_value {
            return Err(ParseErrorKind::HeaderTooLarge);
        }
        if byte < 0x20 && byte != HTAB || byte == 0x7f {
            return Err(ParseErrorKind::MalformedLine);
        }
        self.header_value.push(byte);
        Ok(())
    }

    /// Store a completed header and derive request flags from the well-known ones.
    fn finish_header(&mut self) -> Result<(), ParseErrorKind> {
        let max_headers = self.options.max_headers;
        let name = String::from_utf8(std::mem::take(&mut self.header_name))
            .map_err(|_| ParseErrorKind::MalformedLine)?;
        let mut value = String::from_utf8_lossy(&std::mem::take(&mut self.header_value))
            .into_owned();
        value.truncate(value.trim_end().len());

        let req = self.current()?;
        if req.headers.len() >= max_headers {
            return Err(ParseErrorKind::TooManyHeaders);
        }

        if name.eq_ignore_ascii_case("content-length") {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseErrorKind::InvalidContentLength);
            }
            let len = value
                .parse::<u64>()
                .map_err(|_| ParseErrorKind::InvalidContentLength)?;
            if req.content_length.map_or(false, |prev| prev != len) {
                return Err(ParseErrorKind::InvalidContentLength);
            }
            req.content_length = Some(len);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            let last = value.rsplit(',').next().unwrap_or("").trim();
            req.chunked = last.eq_ignore_ascii_case("chunked");
        } else if name.eq_ignore_ascii_case("content-type") {
            req.content_type = Some(value.clone());
        } else if name.eq_ignore_ascii_case("upgrade") {
            if value.trim().eq_ignore_ascii_case("websocket") {
                req.websocket_upgrade = true;
            }
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("keep-alive") {
                    req.keep_alive = true;
                } else if token.eq_ignore_ascii_case("close") {
                    req.keep_alive = false;
                }
            }
        }

        req.headers.append(name, value);
        Ok(())
    }

    fn finish_head(&mut self) -> Result<(), ParseErrorKind> {
        let max_body = self.options.max_body_size;
        let req = self.current()?;
        if req.chunked && req.content_length.is_some() {
            return Err(ParseErrorKind::ConflictingLength);
        }
        // A transfer coding other than a final `chunked` leaves the body unframed.
        if !req.chunked && req.headers.contains("transfer-encoding") {
            return Err(ParseErrorKind::MalformedLine);
        }

        if req.chunked {
            req.body = Some(Vec::new());
            self.state = State::ChunkSize { digits: 0 };
            return Ok(());
        }

        match req.content_length {
            Some(len) if len > max_body => Err(ParseErrorKind::BodyTooLarge),
            Some(len) if len > 0 => {
                req.body = Some(Vec::with_capacity(len as usize));
                self.state = State::FixedBody { remaining: len };
                Ok(())
            }
            _ => {
                self.complete();
                Ok(())
            }
        }
    }

    fn append_body(&mut self, bytes: &[u8]) {
        if let Some(body) = self.request.as_mut().and_then(|r| r.body.as_mut()) {
            body.extend_from_slice(bytes);
        }
    }

    fn body_len(&self) -> u64 {
        self.request
            .as_ref()
            .and_then(|r| r.body.as_ref())
            .map_or(0, |b| b.len() as u64)
    }

    fn complete(&mut self) {
        self.state = State::Method;
        if let Some(mut req) = self.request.take() {
            self.parsed += 1;
            req.sequence = self.parsed;
            if self.options.trace.parser {
                trace!("request {} complete: {} {}", req.sequence, req.method, req.uri);
            }
            if req.websocket_upgrade {
                self.state = State::Upgraded;
            }
            self.completed.push_back(req);
        }
    }

    fn current(&mut self) -> Result<&mut Request, ParseErrorKind> {
        self.request.as_mut().ok_or(ParseErrorKind::MalformedLine)
    }
}

fn is_token(byte: u8) -> bool {
    matches!(byte,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

fn hex_value(byte: u8) -> Option<u64> {
    match byte {
        b'0'..=b'9' => Some((byte - b'0') as u64),
        b'a'..=b'f' => Some((byte - b'a' + 10) as u64),
        b'A'..=b'F' => Some((byte - b'A' + 10) as u64),
        _ => None,
    }
}
