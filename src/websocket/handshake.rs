use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_types::Method;
use sha1::{Digest, Sha1};

use crate::Request;

/// The GUID appended to the client key before hashing (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const SUPPORTED_VERSION: &str = "13";

/// Compute `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// The outcome of a valid opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Handshake {
    pub(crate) accept: String,
    pub(crate) protocol: Option<String>,
}

/// Why an upgrade request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeError {
    /// Not a `GET` carrying `Upgrade: websocket` and `Connection: upgrade`.
    NotUpgrade,
    /// `Sec-WebSocket-Version` is missing or not 13.
    Version,
    /// `Sec-WebSocket-Key` is missing or not a 16 byte nonce.
    Key,
}

/// Validate an upgrade request and pick the sub-protocol.
///
/// The first protocol offered by the client that `supported` contains wins.
pub(crate) fn negotiate(req: &Request, supported: &[String]) -> Result<Handshake, HandshakeError> {
    if req.method() != Method::Get
        || !req.is_websocket_upgrade()
        || !req.headers().has_token("connection", "upgrade")
    {
        return Err(HandshakeError::NotUpgrade);
    }
    if req.header("sec-websocket-version").map(str::trim) != Some(SUPPORTED_VERSION) {
        return Err(HandshakeError::Version);
    }
    let key = req.header("sec-websocket-key").ok_or(HandshakeError::Key)?;
    match STANDARD.decode(key.trim()) {
        Ok(nonce) if nonce.len() == 16 => {}
        _ => return Err(HandshakeError::Key),
    }

    let protocol = req
        .headers()
        .get_all("sec-websocket-protocol")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find(|offer| supported.iter().any(|s| s == offer))
        .map(String::from);

    Ok(Handshake {
        accept: accept_key(key),
        protocol,
    })
}
