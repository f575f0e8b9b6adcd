use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::providers::{CipherProvider, DigestAlgorithm};
use crate::{Error, Result, SessionPolicy};

/// Why a session token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    /// Not valid base64.
    #[error("token is not base64")]
    Encoding,
    /// The cipher provider could not open the token.
    #[error("token could not be deciphered")]
    Cipher,
    /// The plaintext lacks its delimiters or hex fields.
    #[error("token plaintext is malformed")]
    Malformed,
    /// Issued by another server instance.
    #[error("token was issued by another server instance")]
    ForeignInstance,
    /// Older than the user's validity window.
    #[error("token has expired")]
    Expired,
}

/// Seals and opens the native session token.
///
/// The plaintext is `username:hex(issued):hex(instance)`; it is enciphered with
/// a key derived from the server secret and carried base64-encoded in a cookie.
pub struct SessionTokenCodec {
    cipher: Arc<dyn CipherProvider>,
    key: Vec<u8>,
    instance: u64,
    policy: SessionPolicy,
    cookie_name: String,
}

impl SessionTokenCodec {
    /// Create a codec bound to server `instance`.
    pub fn new(
        cipher: Arc<dyn CipherProvider>,
        secret: &[u8],
        instance: u64,
        policy: SessionPolicy,
        cookie_name: impl Into<String>,
    ) -> Self {
        let key = cipher.digest(DigestAlgorithm::Sha256, secret);
        Self {
            cipher,
            key,
            instance,
            policy,
            cookie_name: cookie_name.into(),
        }
    }

    /// The running server's instance identifier.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// How long issued tokens stay valid.
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// The cookie the token travels in.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Seal a token for `username` issued at `issued` (seconds since the epoch).
    pub fn encode(&self, username: &str, issued: u64) -> Result<String> {
        let plaintext = format!("{}:{:x}:{:x}", username, issued, self.instance);
        let sealed = self
            .cipher
            .encipher(&self.key, plaintext.as_bytes())
            .map_err(Error::Cipher)?;
        Ok(STANDARD.encode(sealed))
    }

    /// A `Set-Cookie` value carrying `token`.
    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            self.cookie_name, token
        )
    }

    /// Open `token` and return its username if it is still valid at `now`.
    pub fn decode(&self, token: &str, now: u64) -> std::result::Result<String, TokenRejection> {
        let sealed = STANDARD
            .decode(token.trim())
            .map_err(|_| TokenRejection::Encoding)?;
        let plaintext = self
            .cipher
            .decipher(&self.key, &sealed)
            .map_err(|_| TokenRejection::Cipher)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| TokenRejection::Malformed)?;

        let mut fields = plaintext.rsplitn(3, ':');
        let (instance, issued, username) = match (fields.next(), fields.next(), fields.next()) {
            (Some(instance), Some(issued), Some(username)) => (instance, issued, username),
            _ => return Err(TokenRejection::Malformed),
        };
        let issued = u64::from_str_radix(issued, 16).map_err(|_| TokenRejection::Malformed)?;
        let instance = u64::from_str_radix(instance, 16).map_err(|_| TokenRejection::Malformed)?;
        if username.is_empty() {
            return Err(TokenRejection::Malformed);
        }

        let window = self.policy.window_for(username);
        if instance != self.instance {
            return Err(TokenRejection::ForeignInstance);
        }
        if let Some(window) = window {
            if now.saturating_sub(issued) > window.as_secs() {
                return Err(TokenRejection::Expired);
            }
        }
        Ok(username.to_string())
    }
}

impl fmt::Debug for SessionTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenCodec")
            .field("instance", &self.instance)
            .field("policy", &self.policy)
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}
