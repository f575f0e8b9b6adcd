//! Username and password extraction for the credential flow.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::Request;

/// Passwords at least this long are passphrases and keep their case.
const PASSPHRASE_MIN: usize = 9;

/// Credentials from `Authorization: Basic`, else those already on the request.
pub(crate) fn extract(req: &Request) -> Option<(String, String)> {
    req.header("authorization")
        .and_then(parse_basic)
        .or_else(|| {
            req.credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string()))
        })
}

/// Decode a `Basic` authorization value into username and password.
pub(crate) fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    if user.is_empty() {
        return None;
    }
    Some((user.to_string(), pass.to_string()))
}

/// Apply the platform case rules before verification.
pub(crate) fn fold(username: &str, password: &str, mixed_case: bool) -> (String, String) {
    let password = if mixed_case || password.chars().count() >= PASSPHRASE_MIN {
        password.to_string()
    } else {
        password.to_uppercase()
    };
    (username.to_uppercase(), password)
}
