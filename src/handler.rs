//! Handler-facing request/response types - hot path for request dispatch.
//!
//! A handler is a plain value holding a function reference: the registry
//! stores `Arc<dyn Handler>` and the connection driver calls it directly on
//! the connection's coroutine. No reflection, no per-request channels.

use http::Method;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use crate::ids::{ConnectionId, RequestId};

/// Maximum number of path/query parameters before heap allocation.
/// Most REST APIs have ≤4 path params (e.g., /users/{id}/posts/{postId}).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Maximum inline headers/cookies before heap allocation.
/// Most requests have ≤16 headers.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated parameter storage for the hot path.
///
/// Param names use `Arc<str>` instead of `String` because names come from
/// the static route templates (known at registration) and `Arc::clone()` is
/// O(1). Values remain `String` as they're per-request data from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Stack-allocated header/cookie storage for the hot path.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Request data passed to a handler.
///
/// Contains all extracted HTTP request information: path/query parameters,
/// headers, and cookies. The body is NOT part of this struct - it is a
/// streaming read view handed to [`Handler::handle`] separately, so a
/// handler that ignores the body never buffers it.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    /// Unique request ID for tracing and correlation
    pub request_id: RequestId,
    /// Identity of the owning TCP connection
    pub connection_id: ConnectionId,
    /// HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Request path (query string stripped)
    pub path: String,
    /// Path parameters bound by the route template (stack-allocated for ≤8 params)
    pub path_params: ParamVec,
    /// Query string parameters (stack-allocated for ≤8 params)
    pub query_params: ParamVec,
    /// HTTP headers, lowercase names (stack-allocated for ≤16 headers)
    pub headers: HeaderVec,
    /// Cookies parsed from the Cookie header
    pub cookies: HeaderVec,
}

impl HandlerRequest {
    /// Get a path parameter by name.
    ///
    /// Uses "last write wins" semantics: if duplicate parameter names exist
    /// at different path depths (e.g., `/org/{id}/team/{id}`), returns the
    /// last occurrence.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name (last write wins for duplicates).
    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a header by name (case-insensitive per RFC 7230).
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a cookie by name.
    #[inline]
    #[must_use]
    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Convert path_params to HashMap for compatibility with non-hot-path
    /// code. Note: this allocates - use get_path_param() in hot paths.
    #[must_use]
    pub fn path_params_map(&self) -> HashMap<String, String> {
        self.path_params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

/// Response data returned by a handler.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResponse {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    /// HTTP response headers (stack-allocated for ≤16 headers)
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    /// Raw response body bytes
    pub body: Vec<u8>,
}

impl HandlerResponse {
    /// Create a new response with the given status, headers, and body.
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a JSON response with a content-type header.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body: body.to_string().into_bytes(),
        }
    }

    /// Create a plain-text response.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "text/plain".to_string()));
        Self {
            status,
            headers,
            body: body.into().into_bytes(),
        }
    }

    /// Create a JSON error response.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    /// Get a header by name (case-insensitive).
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or update a header (case-insensitive replacement).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }
}

/// A request delegate.
///
/// Implemented for free by any matching closure, so registrations read as
/// `registry.register(..., |req, body| { ... })`. The body argument is a
/// bounded read view over the request body; reading past the declared length
/// yields end-of-stream. Handlers are free to ignore it - the framing engine
/// drains whatever is left.
pub trait Handler: Send + Sync {
    fn handle(&self, req: &HandlerRequest, body: &mut dyn io::Read) -> HandlerResponse;
}

impl<F> Handler for F
where
    F: Fn(&HandlerRequest, &mut dyn io::Read) -> HandlerResponse + Send + Sync,
{
    fn handle(&self, req: &HandlerRequest, body: &mut dyn io::Read) -> HandlerResponse {
        self(req, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HandlerRequest {
        let mut path_params = ParamVec::new();
        path_params.push((Arc::from("id"), "org".to_string()));
        path_params.push((Arc::from("id"), "user".to_string()));
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        HandlerRequest {
            request_id: RequestId::new(),
            connection_id: ConnectionId::next(),
            method: Method::GET,
            path: "/orgs/org/users/user".to_string(),
            path_params,
            query_params: ParamVec::new(),
            headers,
            cookies: HeaderVec::new(),
        }
    }

    #[test]
    fn test_path_param_last_write_wins() {
        assert_eq!(request().get_path_param("id"), Some("user"));
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        assert_eq!(
            request().get_header("Content-Type"),
            Some("application/json")
        );
    }

    #[test]
    fn test_set_header_replaces() {
        let mut res = HandlerResponse::json(200, serde_json::json!({}));
        res.set_header("Content-Type", "text/plain".to_string());
        assert_eq!(res.get_header("content-type"), Some("text/plain"));
        assert_eq!(res.headers.len(), 1);
    }

    #[test]
    fn test_closure_is_a_handler() {
        let h: Arc<dyn Handler> =
            Arc::new(|_req: &HandlerRequest, _body: &mut dyn io::Read| HandlerResponse::text(200, "ok"));
        let mut empty = io::empty();
        let res = h.handle(&request(), &mut empty);
        assert_eq!(res.status, 200);
    }
}
