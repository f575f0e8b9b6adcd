//! Parsed HTTP requests.

use http_types::{Method, Version};

use crate::Headers;

/// A completed HTTP request.
///
/// Built by the request parser; the engine only attaches the outcome of
/// authentication before handing it to a service.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) path: String,
    pub(crate) segments: Vec<String>,
    pub(crate) query: Option<String>,
    pub(crate) fragment: Option<String>,
    pub(crate) content_length: Option<u64>,
    pub(crate) content_type: Option<String>,
    pub(crate) chunked: bool,
    pub(crate) keep_alive: bool,
    pub(crate) websocket_upgrade: bool,
    pub(crate) username: Option<String>,
    pub(crate) auth_token: Option<String>,
    pub(crate) credentials: Option<(String, String)>,
    pub(crate) sequence: u64,
}

impl Request {
    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The raw request target.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Header fields in the order they were received.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The first value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The request body, if one was sent.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The body decoded as UTF-8.
    pub fn body_string(&self) -> Option<&str> {
        self.body().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// The undecoded path portion of the target.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The percent-decoded, non-empty path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Everything after `?`, without the fragment.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Value of query parameter `name`, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| match pair.split_once('=') {
                Some((k, v)) => Some((k, v)),
                None if !pair.is_empty() => Some((pair, "")),
                None => None,
            })
            .find(|(k, _)| *k == name)
            .and_then(|(_, v)| {
                urlencoding::decode(&v.replace('+', " "))
                    .ok()
                    .map(|v| v.into_owned())
            })
    }

    /// Everything after `#`.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// The declared `Content-Length`.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The declared `Content-Type`.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Whether the body used chunked transfer encoding.
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Whether the connection should stay open after this request.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether the client asked to upgrade to WebSocket.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.websocket_upgrade
    }

    /// The authenticated user, once authentication succeeded.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The raw token that authenticated the request, if a token flow was used.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Credentials parsed ahead of authentication, e.g. by a login form.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Attach credentials gathered outside the `Authorization` header.
    pub fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.credentials = Some((username.into(), password.into()));
    }

    /// Value of the cookie `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers.cookie(name)
    }

    /// Position of this request on its conversation, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn new(method: Method, uri: String, version: Version) -> Self {
        Self {
            method,
            uri,
            version,
            headers: Headers::new(),
            body: None,
            path: String::new(),
            segments: Vec::new(),
            query: None,
            fragment: None,
            content_length: None,
            content_type: None,
            chunked: false,
            keep_alive: version == Version::Http1_1,
            websocket_upgrade: false,
            username: None,
            auth_token: None,
            credentials: None,
            sequence: 0,
        }
    }

    /// Split the target into path, query and fragment and decode the segments.
    pub(crate) fn derive_target(&mut self) -> Result<(), std::string::FromUtf8Error> {
        let mut rest = self.uri.as_str();
        if let Some(idx) = rest.find("://") {
            // absolute-form: skip scheme and authority
            let after = &rest[idx + 3..];
            rest = after.find('/').map(|i| &after[i..]).unwrap_or("/");
        }

        let (before_fragment, fragment) = match rest.split_once('#') {
            Some((b, f)) => (b, Some(f.to_owned())),
            None => (rest, None),
        };
        let (path, query) = match before_fragment.split_once('?') {
            Some((p, q)) => (p, Some(q.to_owned())),
            None => (before_fragment, None),
        };

        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            segments.push(urlencoding::decode(segment)?.into_owned());
        }

        self.path = path.to_owned();
        self.segments = segments;
        self.query = query;
        self.fragment = fragment;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(uri: &str) -> Request {
        let mut req = Request::new(Method::Get, uri.to_owned(), Version::Http1_1);
        req.derive_target().unwrap();
        req
    }

    #[test]
    fn splits_path_query_fragment() {
        let req = target("/plugins/a%20b/x?name=J%C3%BCrgen&flag#top");
        assert_eq!(req.path(), "/plugins/a%20b/x");
        assert_eq!(req.segments(), ["plugins", "a b", "x"]);
        assert_eq!(req.query(), Some("name=J%C3%BCrgen&flag"));
        assert_eq!(req.query_param("name").as_deref(), Some("Jürgen"));
        assert_eq!(req.query_param("flag").as_deref(), Some(""));
        assert_eq!(req.fragment(), Some("top"));
    }

    #[test]
    fn query_values_are_owned_after_decoding() {
        let req = target("/search?q=hello+big%20world&empty=");
        assert_eq!(req.query_param("q").as_deref(), Some("hello big world"));
        assert_eq!(req.query_param("empty").as_deref(), Some(""));
        assert_eq!(req.query_param("absent"), None);
        assert_eq!(req.header("Host"), None);
    }

    #[test]
    fn absolute_form_keeps_only_path() {
        let req = target("http://domain.com/some/resource");
        assert_eq!(req.segments(), ["some", "resource"]);
    }

    #[test]
    fn root_has_no_segments() {
        assert!(target("/").segments().is_empty());
        assert!(target("/?q=1").segments().is_empty());
    }
}
