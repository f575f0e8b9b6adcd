//! Seams to the credential, identity and cipher providers.

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Why a credential verifier refused a username and password.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Unknown user or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// The password is right but has expired.
    #[error("password expired")]
    PasswordExpired,
    /// A platform specific refusal.
    #[error("verifier refused with {return_code}/{reason_code}")]
    Platform {
        /// Primary status.
        return_code: u32,
        /// Detail status.
        reason_code: u32,
    },
}

/// Checks a username and password.
pub trait CredentialVerifier: Send + Sync {
    /// Verify `password` for `username`.
    fn verify(&self, username: &str, password: &str) -> Result<(), VerifyError>;
}

impl<F> CredentialVerifier for F
where
    F: Fn(&str, &str) -> Result<(), VerifyError> + Send + Sync,
{
    fn verify(&self, username: &str, password: &str) -> Result<(), VerifyError> {
        (self)(username, password)
    }
}

/// Claims carried by a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The principal the token was issued for.
    #[serde(rename = "sub")]
    pub subject: String,
    /// Expiry, seconds since the epoch.
    #[serde(rename = "exp")]
    pub expires: u64,
    /// Issuer, if the token names one.
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Verifies bearer tokens.
pub trait TokenVerifier: Send + Sync {
    /// Check the token's signature and validity and return its claims.
    fn verify_and_parse(&self, token: &str) -> Result<Claims, String>;
}

/// A [`TokenVerifier`] for HS256-signed JSON Web Tokens.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Verify tokens signed with `secret`. `exp` is required.
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Also require the `iss` claim to equal `issuer`.
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify_and_parse(&self, token: &str) -> Result<Claims, String> {
        jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| err.to_string())
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish()
    }
}

/// Hash functions available to [`CipherProvider::digest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-1, 20 bytes.
    Sha1,
    /// SHA-256, 32 bytes.
    Sha256,
}

/// Symmetric cipher and digest primitives used to seal session tokens.
pub trait CipherProvider: Send + Sync {
    /// Encrypt `plaintext` under `key`.
    fn encipher(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, String>;

    /// Decrypt `ciphertext` under `key`.
    fn decipher(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, String>;

    /// Hash `data`.
    fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
        match algorithm {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn sign(claims: &Claims, secret: &[u8]) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn jwt_round_trip() {
        let claims = Claims {
            subject: "IBMUSER".into(),
            expires: now() + 600,
            issuer: Some("gateway".into()),
        };
        let verifier = JwtVerifier::hs256(b"secret").with_issuer("gateway");
        let parsed = verifier.verify_and_parse(&sign(&claims, b"secret")).unwrap();
        assert_eq!(parsed.subject, "IBMUSER");
    }

    #[test]
    fn jwt_rejects_wrong_secret_and_expiry() {
        let verifier = JwtVerifier::hs256(b"secret");
        let fresh = Claims { subject: "a".into(), expires: now() + 600, issuer: None };
        assert!(verifier.verify_and_parse(&sign(&fresh, b"other")).is_err());

        let stale = Claims { subject: "a".into(), expires: now() - 3600, issuer: None };
        assert!(verifier.verify_and_parse(&sign(&stale, b"secret")).is_err());
    }

    #[test]
    fn default_digests() {
        struct Null;
        impl CipherProvider for Null {
            fn encipher(&self, _: &[u8], p: &[u8]) -> Result<Vec<u8>, String> {
                Ok(p.to_vec())
            }
            fn decipher(&self, _: &[u8], c: &[u8]) -> Result<Vec<u8>, String> {
                Ok(c.to_vec())
            }
        }
        assert_eq!(Null.digest(DigestAlgorithm::Sha1, b"abc").len(), 20);
        assert_eq!(
            Null.digest(DigestAlgorithm::Sha256, b"abc")[..4],
            [0xba, 0x78, 0x16, 0xbf]
        );
    }
}
