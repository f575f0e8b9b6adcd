//! Encode HTTP response heads on the server.

use std::io::Write;
use std::time::SystemTime;

use http_types::StatusCode;

use crate::Headers;

/// How the body of a response is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Length(u64),
    Chunked,
    /// No body follows, e.g. `101 Switching Protocols`.
    None,
}

/// Encode the status line and headers of a response.
pub(crate) fn encode_head(
    status: StatusCode,
    reason: Option<&str>,
    headers: &Headers,
    framing: Framing,
    keep_alive: bool,
) -> Vec<u8> {
    let mut head = Vec::with_capacity(256);
    let reason = reason.unwrap_or_else(|| status.canonical_reason());
    // writing into a Vec cannot fail
    let _ = write!(head, "HTTP/1.1 {} {}\r\n", status as u16, reason);

    match framing {
        Framing::Length(len) => {
            let _ = write!(head, "content-length: {}\r\n", len);
        }
        Framing::Chunked => head.extend_from_slice(b"transfer-encoding: chunked\r\n"),
        Framing::None => {}
    }

    if !headers.contains("date") {
        let date = httpdate::fmt_http_date(SystemTime::now());
        let _ = write!(head, "date: {}\r\n", date);
    }

    if !keep_alive && framing != Framing::None && !headers.contains("connection") {
        head.extend_from_slice(b"connection: close\r\n");
    }

    for (name, value) in headers.iter() {
        let _ = write!(head, "{}: {}\r\n", name, value);
    }

    head.extend_from_slice(b"\r\n");
    head
}
