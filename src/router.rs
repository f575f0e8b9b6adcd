//! Route requests to services by URL mask.
//!
//! A mask is a `/`-separated list of segments. `*` matches any single path
//! segment and a trailing `**` matches whatever remains of the path, including
//! nothing. The first registered route whose mask matches wins.

use std::fmt;
use std::sync::Arc;

use crate::auth::AuthMode;
use crate::websocket::MessageHandler;
use crate::{Request, Response, Result};

/// Serves HTTP requests routed to it.
pub trait Service: Send + Sync + 'static {
    /// Produce the response for `req`. An unfinished response is finished by
    /// the engine.
    fn serve(&self, req: &Request, res: &mut Response<'_>) -> Result<()>;
}

impl<F> Service for F
where
    F: Fn(&Request, &mut Response<'_>) -> Result<()> + Send + Sync + 'static,
{
    fn serve(&self, req: &Request, res: &mut Response<'_>) -> Result<()> {
        (self)(req, res)
    }
}

/// Runs a handler under the identity of the authenticated user.
pub trait Impersonator: Send + Sync {
    /// Switch to `username`.
    fn begin(&self, username: &str) -> std::result::Result<(), String>;

    /// Switch back.
    fn end(&self, username: &str);
}

/// One segment of a [`RouteMask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskSegment {
    /// Matches this exact, decoded segment.
    Literal(String),
    /// `*`
    Any,
    /// `**`
    Rest,
}

/// A parsed URL mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMask {
    segments: Vec<MaskSegment>,
}

impl RouteMask {
    /// Parse `mask`. `**` anywhere but last behaves like `*`.
    pub fn parse(mask: &str) -> Self {
        let parts: Vec<&str> = mask.split('/').filter(|s| !s.is_empty()).collect();
        let last = parts.len().saturating_sub(1);
        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| match *part {
                "**" if i == last => MaskSegment::Rest,
                "*" | "**" => MaskSegment::Any,
                literal => MaskSegment::Literal(literal.to_string()),
            })
            .collect();
        Self { segments }
    }

    /// The parsed segments.
    pub fn segments(&self) -> &[MaskSegment] {
        &self.segments
    }

    /// Whether the decoded path `segments` match.
    pub fn matches<S: AsRef<str>>(&self, segments: &[S]) -> bool {
        for (i, mask) in self.segments.iter().enumerate() {
            match mask {
                MaskSegment::Rest => return true,
                MaskSegment::Any if i < segments.len() => {}
                MaskSegment::Literal(literal)
                    if segments.get(i).map(|s| s.as_ref()) == Some(literal.as_str()) => {}
                _ => return false,
            }
        }
        segments.len() == self.segments.len()
    }
}

impl fmt::Display for RouteMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                MaskSegment::Literal(literal) => write!(f, "/{}", literal)?,
                MaskSegment::Any => f.write_str("/*")?,
                MaskSegment::Rest => f.write_str("/**")?,
            }
        }
        Ok(())
    }
}

/// What a route hands its requests to.
#[derive(Clone)]
pub enum RouteHandler {
    /// A plain HTTP service.
    Http(Arc<dyn Service>),
    /// An upgrade to a WebSocket session.
    WebSocket {
        /// Receives the session's messages.
        handler: Arc<dyn MessageHandler>,
        /// Sub-protocols this route speaks, in no particular order.
        protocols: Vec<String>,
    },
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteHandler::Http(_) => f.write_str("Http"),
            RouteHandler::WebSocket { protocols, .. } => f
                .debug_struct("WebSocket")
                .field("protocols", protocols)
                .finish(),
        }
    }
}

/// A registered route. Immutable once registered.
#[derive(Debug, Clone)]
pub struct HttpServiceRoute {
    name: String,
    mask: RouteMask,
    auth_mode: AuthMode,
    handler: RouteHandler,
    run_on_subtask: bool,
    impersonate: bool,
}

impl HttpServiceRoute {
    /// An HTTP route.
    pub fn new(name: impl Into<String>, mask: &str, service: impl Service) -> Self {
        Self::with_handler(name, mask, RouteHandler::Http(Arc::new(service)))
    }

    /// A WebSocket route speaking `protocols`.
    pub fn websocket<I, S>(name: impl Into<String>, mask: &str, handler: impl MessageHandler, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handler = RouteHandler::WebSocket {
            handler: Arc::new(handler),
            protocols: protocols.into_iter().map(Into::into).collect(),
        };
        Self::with_handler(name, mask, handler)
    }

    fn with_handler(name: impl Into<String>, mask: &str, handler: RouteHandler) -> Self {
        Self {
            name: name.into(),
            mask: RouteMask::parse(mask),
            auth_mode: AuthMode::None,
            handler,
            run_on_subtask: false,
            impersonate: false,
        }
    }

    /// Require `mode` authentication.
    pub fn auth(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    /// Run the service on a worker subtask instead of the reactor thread.
    pub fn on_subtask(mut self) -> Self {
        self.run_on_subtask = true;
        self
    }

    /// Run the service as the authenticated user.
    pub fn impersonate(mut self) -> Self {
        self.impersonate = true;
        self
    }

    /// The route's name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The URL mask.
    pub fn mask(&self) -> &RouteMask {
        &self.mask
    }

    /// The authentication mode.
    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// The handler.
    pub fn handler(&self) -> &RouteHandler {
        &self.handler
    }

    /// Whether the service runs on a subtask.
    pub fn runs_on_subtask(&self) -> bool {
        self.run_on_subtask
    }

    /// Whether the service runs impersonated.
    pub fn impersonates(&self) -> bool {
        self.impersonate
    }
}

/// Routes in registration order.
#[derive(Debug, Clone, Default)]
pub struct ServiceRouter {
    routes: Vec<Arc<HttpServiceRoute>>,
}

impl ServiceRouter {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `route` after every route already registered.
    pub fn register(&mut self, route: HttpServiceRoute) {
        self.routes.push(Arc::new(route));
    }

    /// The first route matching `req`.
    pub fn find(&self, req: &Request) -> Option<Arc<HttpServiceRoute>> {
        self.find_segments(req.segments())
    }

    /// The first route matching decoded path `segments`.
    pub fn find_segments<S: AsRef<str>>(&self, segments: &[S]) -> Option<Arc<HttpServiceRoute>> {
        self.routes
            .iter()
            .find(|route| route.mask.matches(segments))
            .cloned()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_: &Request, _: &mut Response<'_>) -> Result<()> {
        Ok(())
    }

    #[test]
    fn wildcards() {
        let mask = RouteMask::parse("/api/*/items/**");
        assert!(mask.matches(&["api", "v1", "items"]));
        assert!(mask.matches(&["api", "v1", "items", "a", "b"]));
        assert!(!mask.matches(&["api", "v1"]));
        assert!(!mask.matches(&["api", "v1", "other"]));
        assert_eq!(mask.to_string(), "/api/*/items/**");
    }

    #[test]
    fn empty_mask_is_root_only() {
        let mask = RouteMask::parse("/");
        assert!(mask.matches::<&str>(&[]));
        assert!(!mask.matches(&["a"]));
    }

    #[test]
    fn strict_prefix_does_not_match() {
        assert!(!RouteMask::parse("/a/b").matches(&["a", "b", "c"]));
        assert!(!RouteMask::parse("/a/*").matches(&["a", "b", "c"]));
    }

    #[test]
    fn first_registration_wins() {
        let mut router = ServiceRouter::new();
        router.register(HttpServiceRoute::new("wild", "/a/*", ok));
        router.register(HttpServiceRoute::new("exact", "/a/b", ok));
        router.register(HttpServiceRoute::new("rest", "/a/**", ok));
        assert_eq!(router.find_segments(&["a", "b"]).unwrap().name(), "wild");
        assert_eq!(router.find_segments(&["a", "b", "c"]).unwrap().name(), "rest");
        assert!(router.find_segments(&["b"]).is_none());
    }
}
