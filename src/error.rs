use std::io;

use http_types::StatusCode;

/// A specialized `Result` for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while driving a conversation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The inbound byte stream is not a valid HTTP request.
    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    /// The transport failed or reached end of stream.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated the WebSocket framing rules.
    #[error("websocket protocol violation: {0}")]
    WebSocket(&'static str),

    /// The cipher provider could not seal or open a session token.
    #[error("cipher failure: {0}")]
    Cipher(String),

    /// A response tried to select a second output mode.
    #[error("response output mode already chosen")]
    OutputModeChosen,

    /// A response was used after it was finished.
    #[error("response already finished")]
    ResponseFinished,

    /// A service handler reported a failure.
    #[error("handler failed: {0}")]
    Handler(String),
}

/// The reason the request parser rejected its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The request line or a header line is malformed.
    MalformedLine,
    /// The method token is not a recognized HTTP method.
    UnknownMethod,
    /// The request target exceeds the configured maximum.
    UriTooLong,
    /// A header name or value exceeds the configured maximum.
    HeaderTooLarge,
    /// More headers than the configured maximum.
    TooManyHeaders,
    /// The HTTP version is not `HTTP/1.0` or `HTTP/1.1`.
    UnsupportedVersion,
    /// `Content-Length` is not a decimal number.
    InvalidContentLength,
    /// Both `Content-Length` and `Transfer-Encoding: chunked` were sent.
    ConflictingLength,
    /// The declared body exceeds the configured maximum.
    BodyTooLarge,
    /// A chunk size line is not valid hex.
    InvalidChunkSize,
    /// A chunk size exceeds the configured maximum.
    ChunkTooLarge,
    /// Chunk data was not followed by CRLF.
    MissingChunkTerminator,
    /// The chunked body carried trailer headers.
    TrailerUnsupported,
    /// The request target could not be percent-decoded.
    InvalidPath,
}

/// A syntax error detected by the request parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{} ({})", .kind.description(), .kind.status())]
pub struct ParseError {
    kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind) -> Self {
        Self { kind }
    }

    /// What went wrong.
    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }

    /// The status the client should receive for this error.
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl ParseErrorKind {
    /// The status code reported to the client.
    pub fn status(self) -> StatusCode {
        match self {
            ParseErrorKind::UnknownMethod => StatusCode::MethodNotAllowed,
            ParseErrorKind::UriTooLong => StatusCode::UriTooLong,
            ParseErrorKind::HeaderTooLarge
            | ParseErrorKind::BodyTooLarge
            | ParseErrorKind::ChunkTooLarge => StatusCode::PayloadTooLarge,
            ParseErrorKind::TooManyHeaders => StatusCode::RequestHeaderFieldsTooLarge,
            _ => StatusCode::BadRequest,
        }
    }

    fn description(self) -> &'static str {
        match self {
            ParseErrorKind::MalformedLine => "malformed request line or header",
            ParseErrorKind::UnknownMethod => "unrecognized method",
            ParseErrorKind::UriTooLong => "request target too long",
            ParseErrorKind::HeaderTooLarge => "header exceeds configured maximum",
            ParseErrorKind::TooManyHeaders => "too many headers",
            ParseErrorKind::UnsupportedVersion => "unsupported http version",
            ParseErrorKind::InvalidContentLength => "invalid content-length header",
            ParseErrorKind::ConflictingLength => "unexpected content-length header",
            ParseErrorKind::BodyTooLarge => "body exceeds configured maximum",
            ParseErrorKind::InvalidChunkSize => "invalid chunk size",
            ParseErrorKind::ChunkTooLarge => "chunk size exceeds configured maximum",
            ParseErrorKind::MissingChunkTerminator => "chunk data not terminated by CRLF",
            ParseErrorKind::TrailerUnsupported => "chunk trailers are not supported",
            ParseErrorKind::InvalidPath => "request path is not valid percent-encoding",
        }
    }
}
