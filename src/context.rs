//! Request description and response sink seen by the decision engine.

use http::header::{HeaderName, IF_NONE_MATCH};
use http::{HeaderMap, Method, StatusCode, Uri};
use std::fmt;

/// Header carrying a caller-supplied request identifier.
pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlates the log lines of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(String);

impl TraceId {
    /// Uses the `x-request-id` header when it is present and printable,
    /// otherwise a fresh random id.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(&REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only view of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub trace_id: TraceId,
}

impl<'a> RequestContext<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
            trace_id: TraceId::from_headers(headers),
        }
    }

    pub fn from_request<B>(request: &'a http::Request<B>) -> Self {
        Self::new(request.method(), request.uri(), request.headers())
    }

    /// Borrows only the head, leaving the body free to move.
    pub fn from_parts(parts: &'a http::request::Parts) -> Self {
        Self::new(&parts.method, &parts.uri, &parts.headers)
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// First `If-None-Match` value, if it is valid visible ASCII.
    /// First `If-None-Match` value. Non-ASCII bytes are accepted as long as
    /// the value is valid UTF-8, matching what `ETag` generation can emit.
    pub fn candidate_tag(&self) -> Option<&str> {
        self.headers
            .get(IF_NONE_MATCH)
            .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
    }
}

/// Status and headers the engine may write before the body is produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(headers: HeaderMap) -> Self {
        Self {
            status: StatusCode::OK,
            headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_trace_id_from_request_header() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID, HeaderValue::from_static("req-42"));
        assert_eq!(TraceId::from_headers(&headers).as_str(), "req-42");
    }

    #[test]
    fn test_trace_id_generated_when_missing() {
        let first = TraceId::from_headers(&HeaderMap::new());
        let second = TraceId::from_headers(&HeaderMap::new());
        assert_eq!(first.as_str().len(), 32);
        assert_ne!(first, second);
    }

    #[test]
    fn test_candidate_tag() {
        let request = http::Request::get("/roles")
            .header(IF_NONE_MATCH, "123-42")
            .body(())
            .unwrap();
        let ctx = RequestContext::from_request(&request);
        assert_eq!(ctx.candidate_tag(), Some("123-42"));
        assert_eq!(ctx.path(), "/roles");

        let request = http::Request::get("/roles").body(()).unwrap();
        assert_eq!(RequestContext::from_request(&request).candidate_tag(), None);
    }

    #[test]
    fn test_candidate_tag_with_utf8_suffix() {
        let request = http::Request::get("/roles")
            .header(IF_NONE_MATCH, HeaderValue::from_bytes("1-0-ü".as_bytes()).unwrap())
            .body(())
            .unwrap();
        let ctx = RequestContext::from_request(&request);
        assert_eq!(ctx.candidate_tag(), Some("1-0-ü"));

        let request = http::Request::get("/roles")
            .header(IF_NONE_MATCH, HeaderValue::from_bytes(b"1-0-\xff").unwrap())
            .body(())
            .unwrap();
        assert_eq!(RequestContext::from_request(&request).candidate_tag(), None);
    }

    #[test]
    fn test_response_head_default() {
        let head = ResponseHead::new();
        assert_eq!(head.status, StatusCode::OK);
        assert!(head.headers.is_empty());
    }
}
