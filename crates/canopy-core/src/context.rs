//! Per-request context.
//!
//! A [`RequestContext`] is created when a request arrives, threaded through
//! deserialization and controller invocation, and dropped once the response
//! is written. It is never shared across requests.

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use crate::action::Action;
use crate::format::ContentFormat;

/// A unique identifier for each request, using UUID v7.
///
/// Time-ordered, which makes it suitable for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-request state handed to handler collaborators.
///
/// # Example
///
/// ```rust
/// use canopy_core::{Action, RequestContext};
/// use http::{HeaderMap, Method};
/// use bytes::Bytes;
///
/// let ctx = RequestContext::new(
///     Method::POST,
///     "/clusters",
///     HeaderMap::new(),
///     "ContentType=JSON",
///     Bytes::from_static(b"{\"name\":\"web\"}"),
/// )
/// .with_action(Action::Create);
///
/// assert_eq!(ctx.query_param("ContentType"), Some("JSON"));
/// assert!(ctx.has_body());
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// Request method.
    method: Method,

    /// Request path (no query string).
    path: String,

    /// Request headers.
    headers: HeaderMap,

    /// Decoded query parameters in order of appearance.
    query: Vec<(String, String)>,

    /// Raw request body.
    body: Bytes,

    /// Negotiated response format.
    format: ContentFormat,

    /// Action resolved from the route match.
    action: Option<Action>,

    /// Best-match locale from Accept-Language, if any.
    locale: Option<String>,

    /// When the request started processing.
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context from the parts of an incoming request.
    ///
    /// `raw_query` is the undecoded query string (without the leading `?`);
    /// parameters that fail to decode are dropped.
    #[must_use]
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers: HeaderMap,
        raw_query: &str,
        body: Bytes,
    ) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            path: path.into(),
            headers,
            query: parse_query(raw_query),
            body,
            format: ContentFormat::default(),
            action: None,
            locale: None,
            started_at: Instant::now(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the decoded query parameters.
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Returns the first value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the raw request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the request carries a non-empty body.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Replaces the raw body.
    ///
    /// Negotiation runs before the body is collected from the wire, so the
    /// context is created empty-bodied and filled in once collection
    /// completes.
    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Returns the value of the Content-Type header, if present and valid.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header_str(http::header::CONTENT_TYPE)
    }

    /// Returns the value of the Accept header, if present and valid.
    #[must_use]
    pub fn accept(&self) -> Option<&str> {
        self.header_str(http::header::ACCEPT)
    }

    /// Returns the value of the Accept-Language header, if present and valid.
    #[must_use]
    pub fn accept_language(&self) -> Option<&str> {
        self.header_str(http::header::ACCEPT_LANGUAGE)
    }

    /// Returns the negotiated response format.
    #[must_use]
    pub const fn format(&self) -> ContentFormat {
        self.format
    }

    /// Sets the negotiated response format.
    #[must_use]
    pub fn with_format(mut self, format: ContentFormat) -> Self {
        self.format = format;
        self
    }

    /// Returns the resolved action, if routing has run.
    #[must_use]
    pub const fn action(&self) -> Option<Action> {
        self.action
    }

    /// Sets the resolved action.
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Returns the best-match locale, if any.
    #[must_use]
    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Sets the best-match locale.
    #[must_use]
    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.locale = locale;
        self
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    fn header_str(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Decodes a query string into ordered key/value pairs.
fn parse_query(raw_query: &str) -> Vec<(String, String)> {
    if raw_query.is_empty() {
        return Vec::new();
    }
    serde_urlencoded::from_str(raw_query).unwrap_or_default()
}
