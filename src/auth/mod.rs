//! Authentication of requests before they reach a service.
//!
//! Each route declares an [`AuthMode`]; [`AuthPipeline::authenticate`]
//! dispatches on it and returns either the authenticated identity or an
//! [`AuthFailure`] that decides the answer status.

mod bearer;
mod credential;
mod providers;
mod token;

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use http_types::StatusCode;
use log::trace;

pub use bearer::{BearerConfig, SubjectValidator, TokenExtractor};
pub use providers::{
    CipherProvider, Claims, CredentialVerifier, DigestAlgorithm, JwtVerifier, TokenVerifier,
    VerifyError,
};
pub use token::{SessionTokenCodec, TokenRejection};

use crate::{Request, ServerOptions};

/// Seconds since the epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// How a route authenticates its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Anonymous access.
    #[default]
    None,
    /// Username and password checked by the credential verifier.
    Credential,
    /// The native session token, with credentials to obtain one.
    SessionToken,
    /// A bearer token, optionally falling back to the native session.
    BearerOrSession,
    /// The route checks requests itself.
    Custom,
}

/// A successfully authenticated request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authenticated {
    /// The identity, absent for anonymous and custom routes.
    pub username: Option<String>,
    /// The raw token that authenticated the request, if any.
    pub token: Option<String>,
    /// `Set-Cookie` values to add to the response.
    pub set_cookies: Vec<String>,
}

/// Why authentication failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// The request carried no usable credential material.
    #[error("no credentials supplied")]
    Missing,
    /// The credential verifier refused.
    #[error("credentials refused: {0}")]
    Credentials(VerifyError),
    /// The session token was refused.
    #[error("session token refused: {0}")]
    SessionToken(TokenRejection),
    /// The bearer token was refused.
    #[error("bearer token refused: {0}")]
    Bearer(String),
    /// A new session token could not be sealed.
    #[error("session token could not be issued: {0}")]
    Issue(String),
    /// The route needs a provider that was never configured.
    #[error("{0:?} authentication is not configured")]
    NotConfigured(AuthMode),
}

impl AuthFailure {
    /// The answer status: 428 for expired passwords, 401 otherwise.
    pub fn status(&self) -> StatusCode {
        match self {
            AuthFailure::Credentials(VerifyError::PasswordExpired) => {
                StatusCode::PreconditionRequired
            }
            _ => StatusCode::Unauthorized,
        }
    }
}

/// Dispatches authentication by mode.
pub struct AuthPipeline {
    verifier: Option<Arc<dyn CredentialVerifier>>,
    sessions: Option<SessionTokenCodec>,
    bearer: Option<BearerConfig>,
    mixed_case_passwords: bool,
    clock: Clock,
    trace: bool,
}

impl AuthPipeline {
    /// A pipeline with no providers; only `None` and `Custom` routes pass.
    pub fn new(options: &ServerOptions) -> Self {
        Self {
            verifier: None,
            sessions: None,
            bearer: None,
            mixed_case_passwords: options.mixed_case_passwords,
            clock: Arc::new(system_clock),
            trace: options.trace.auth,
        }
    }

    /// Verify usernames and passwords with `verifier`.
    pub fn with_credentials(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Issue and check native session tokens with `codec`.
    pub fn with_session_tokens(mut self, codec: SessionTokenCodec) -> Self {
        self.sessions = Some(codec);
        self
    }

    /// Accept bearer tokens.
    pub fn with_bearer(mut self, bearer: BearerConfig) -> Self {
        self.bearer = Some(bearer);
        self
    }

    /// Replace the wall clock, e.g. in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The session token codec, if configured.
    pub fn sessions(&self) -> Option<&SessionTokenCodec> {
        self.sessions.as_ref()
    }

    /// Authenticate `req` according to `mode`.
    pub fn authenticate(&self, mode: AuthMode, req: &Request) -> Result<Authenticated, AuthFailure> {
        let outcome = match mode {
            AuthMode::None | AuthMode::Custom => Ok(Authenticated::default()),
            AuthMode::Credential => self.credential(req),
            AuthMode::SessionToken => self.session(req),
            AuthMode::BearerOrSession => self.bearer(req),
        };
        if self.trace {
            match &outcome {
                Ok(auth) => trace!("{:?} auth of {} accepted {:?}", mode, req.path(), auth.username),
                Err(failure) => trace!("{:?} auth of {} refused: {}", mode, req.path(), failure),
            }
        }
        outcome
    }

    fn credential(&self, req: &Request) -> Result<Authenticated, AuthFailure> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or(AuthFailure::NotConfigured(AuthMode::Credential))?;
        let (username, password) = credential::extract(req).ok_or(AuthFailure::Missing)?;
        let (username, password) =
            credential::fold(&username, &password, self.mixed_case_passwords);
        verifier
            .verify(&username, &password)
            .map_err(AuthFailure::Credentials)?;
        Ok(Authenticated {
            username: Some(username),
            ..Authenticated::default()
        })
    }

    fn session(&self, req: &Request) -> Result<Authenticated, AuthFailure> {
        let codec = self
            .sessions
            .as_ref()
            .ok_or(AuthFailure::NotConfigured(AuthMode::SessionToken))?;

        let rejection = match req.cookie(codec.cookie_name()) {
            Some(token) => match codec.decode(token, (self.clock)()) {
                Ok(username) => return self.issue(codec, username, None),
                Err(rejection) => Some(rejection),
            },
            None => None,
        };

        match (credential::extract(req), rejection) {
            (None, Some(rejection)) => Err(AuthFailure::SessionToken(rejection)),
            (None, None) => Err(AuthFailure::Missing),
            (Some(_), _) => {
                let auth = self.credential(req)?;
                let username = auth.username.unwrap_or_default();
                self.issue(codec, username, None)
            }
        }
    }

    fn bearer(&self, req: &Request) -> Result<Authenticated, AuthFailure> {
        let bearer = self
            .bearer
            .as_ref()
            .ok_or(AuthFailure::NotConfigured(AuthMode::BearerOrSession))?;

        let token = match bearer.extract(req) {
            Some(token) => token,
            None if bearer.session_fallback() => return self.session(req),
            None => return Err(AuthFailure::Missing),
        };

        let claims = bearer
            .verifier()
            .verify_and_parse(&token)
            .map_err(AuthFailure::Bearer)?;
        let username = bearer
            .username(&claims)
            .ok_or_else(|| AuthFailure::Bearer(String::from("subject refused")))?;

        match &self.sessions {
            Some(codec) => self.issue(codec, username, Some(token)),
            None => Ok(Authenticated {
                username: Some(username),
                token: Some(token),
                set_cookies: Vec::new(),
            }),
        }
    }

    /// Seal a fresh token for `username`; every success renews it.
    fn issue(
        &self,
        codec: &SessionTokenCodec,
        username: String,
        presented: Option<String>,
    ) -> Result<Authenticated, AuthFailure> {
        let token = codec
            .encode(&username, (self.clock)())
            .map_err(|err| AuthFailure::Issue(err.to_string()))?;
        if self.trace {
            if let Some(group) = codec.policy().window_group(&username) {
                trace!("session for {} expires by group {}", username, group);
            }
        }
        Ok(Authenticated {
            username: Some(username),
            set_cookies: vec![codec.cookie(&token)],
            token: Some(presented.unwrap_or(token)),
        })
    }
}

impl fmt::Debug for AuthPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPipeline")
            .field("credentials", &self.verifier.is_some())
            .field("sessions", &self.sessions)
            .field("bearer", &self.bearer)
            .field("mixed_case_passwords", &self.mixed_case_passwords)
            .finish()
    }
}

fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestParser;

    fn parse(raw: &str) -> Request {
        let mut parser = RequestParser::new(ServerOptions::default());
        parser.process_fragment(raw.as_bytes()).unwrap();
        parser.pop_request().unwrap()
    }

    #[test]
    fn none_and_custom_inspect_nothing() {
        let pipeline = AuthPipeline::new(&ServerOptions::default());
        let req = parse("GET / HTTP/1.1\r\nAuthorization: garbage\r\n\r\n");
        assert_eq!(pipeline.authenticate(AuthMode::None, &req), Ok(Authenticated::default()));
        assert_eq!(pipeline.authenticate(AuthMode::Custom, &req), Ok(Authenticated::default()));
    }

    #[test]
    fn expired_password_is_428() {
        let verifier = |_: &str, _: &str| -> Result<(), VerifyError> { Err(VerifyError::PasswordExpired) };
        let pipeline =
            AuthPipeline::new(&ServerOptions::default()).with_credentials(Arc::new(verifier));
        let req = parse("GET / HTTP/1.1\r\nAuthorization: Basic aWJtdXNlcjpzeXMx\r\n\r\n");
        let failure = pipeline.authenticate(AuthMode::Credential, &req).unwrap_err();
        assert_eq!(failure.status(), StatusCode::PreconditionRequired);
    }

    #[test]
    fn missing_provider_is_reported() {
        let pipeline = AuthPipeline::new(&ServerOptions::default());
        let req = parse("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(
            pipeline.authenticate(AuthMode::SessionToken, &req),
            Err(AuthFailure::NotConfigured(AuthMode::SessionToken))
        );
    }
}
