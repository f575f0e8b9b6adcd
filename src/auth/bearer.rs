use std::fmt;
use std::sync::Arc;

use super::providers::{Claims, TokenVerifier};
use crate::Request;

/// Pulls a bearer token out of a request when neither the header nor the
/// cookie carries one.
pub type TokenExtractor = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// Maps verified claims to a username, or refuses them.
pub type SubjectValidator = Arc<dyn Fn(&Claims) -> Option<String> + Send + Sync>;

/// Configuration of the bearer-or-session flow.
pub struct BearerConfig {
    verifier: Arc<dyn TokenVerifier>,
    cookie_name: String,
    extractor: Option<TokenExtractor>,
    validator: Option<SubjectValidator>,
    session_fallback: bool,
}

impl BearerConfig {
    /// Verify tokens with `verifier`, also looking in cookie `cookie_name`.
    pub fn new(verifier: Arc<dyn TokenVerifier>, cookie_name: impl Into<String>) -> Self {
        Self {
            verifier,
            cookie_name: cookie_name.into(),
            extractor: None,
            validator: None,
            session_fallback: false,
        }
    }

    /// Consult `extractor` after the header and the cookie.
    pub fn with_extractor(mut self, extractor: TokenExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Derive the username with `validator` instead of the subject claim.
    pub fn with_validator(mut self, validator: SubjectValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Fall back to the native session flow when no bearer token is present.
    pub fn with_session_fallback(mut self, fallback: bool) -> Self {
        self.session_fallback = fallback;
        self
    }

    pub(crate) fn session_fallback(&self) -> bool {
        self.session_fallback
    }

    pub(crate) fn verifier(&self) -> &dyn TokenVerifier {
        &*self.verifier
    }

    /// Find a token: `Authorization: Bearer`, then the cookie, then the extractor.
    pub(crate) fn extract(&self, req: &Request) -> Option<String> {
        let from_header = req.header("authorization").and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
                Some(token.trim().to_string())
            } else {
                None
            }
        });
        from_header
            .or_else(|| {
                req.cookie(&self.cookie_name)
                    .filter(|token| !token.is_empty())
                    .map(String::from)
            })
            .or_else(|| self.extractor.as_ref().and_then(|extract| extract(req)))
    }

    pub(crate) fn username(&self, claims: &Claims) -> Option<String> {
        match &self.validator {
            Some(validate) => validate(claims),
            None => Some(claims.subject.clone()).filter(|s| !s.is_empty()),
        }
    }
}

impl fmt::Debug for BearerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerConfig")
            .field("cookie_name", &self.cookie_name)
            .field("extractor", &self.extractor.is_some())
            .field("validator", &self.validator.is_some())
            .field("session_fallback", &self.session_fallback)
            .finish()
    }
}
