//! Request head parsing - a pure function of the header bytes.
//!
//! The framing engine hands this module the raw header block (everything
//! before the `\r\n\r\n` delimiter); it yields the request line, a header
//! map with lowercase names, the keep-alive decision, and the body-length
//! strategy the engine will frame the body with.

use http::{Method, Version};
use std::sync::Arc;

use crate::handler::HeaderVec;
use crate::registry::MediaType;

use super::FramingError;

/// How the body following a header block is framed.
///
/// Chunked takes precedence over any content-length header: when both are
/// present, transfer-encoding governs framing. This is an explicit policy,
/// matching RFC guidance, not an oversight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStrategy {
    /// No body follows the headers.
    None,
    /// Exactly `n` bytes follow.
    Fixed(u64),
    /// A chunked body follows.
    Chunked,
}

/// A parsed request head.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Raw request target as sent (path plus optional query string).
    pub target: String,
    /// Path component of the target (query string stripped).
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    pub version: Version,
    /// Headers in wire order, names lowercased.
    pub headers: HeaderVec,
    /// Whether the connection continues after this request, per this
    /// request's own headers (HTTP/1.1 defaults on, HTTP/1.0 defaults off,
    /// `Connection` overrides either way).
    pub keep_alive: bool,
    /// Body framing chosen from the headers.
    pub body: BodyStrategy,
}

impl RequestHead {
    /// First header value by name (case handled by lowercase storage).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `Host` header, if present.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// Acceptable content types in client preference order: q-value
    /// descending, wire order breaking ties, q=0 entries excluded. An absent
    /// `Accept` header yields an empty list (anything goes - negotiation
    /// falls through to the agnostic handler).
    #[must_use]
    pub fn accept(&self) -> Vec<MediaType> {
        let Some(raw) = self.header("accept") else {
            return Vec::new();
        };
        let mut entries: Vec<(MediaType, f32)> = raw
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                let quality = part
                    .split(';')
                    .skip(1)
                    .filter_map(|param| {
                        let mut kv = param.splitn(2, '=');
                        match (kv.next().map(str::trim), kv.next().map(str::trim)) {
                            (Some("q"), Some(v)) => v.parse::<f32>().ok(),
                            _ => None,
                        }
                    })
                    .next()
                    .unwrap_or(1.0);
                Some((MediaType::parse(part), quality))
            })
            .filter(|(_, q)| *q > 0.0)
            .collect();
        entries.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        entries.into_iter().map(|(media, _)| media).collect()
    }
}

fn malformed(reason: impl Into<String>) -> FramingError {
    FramingError::MalformedHead {
        reason: reason.into(),
    }
}

/// Parse the raw header block (excluding the terminating `\r\n\r\n`).
///
/// # Errors
///
/// `MalformedHead` on a bad request line, an unsupported HTTP version, a
/// header line without a colon, or an unparsable `Content-Length`.
pub fn parse_head(block: &[u8]) -> Result<RequestHead, FramingError> {
    let text = std::str::from_utf8(block).map_err(|_| malformed("head is not valid UTF-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or_else(|| malformed("empty head"))?;
    let mut parts = request_line.split(' ');
    let method = parts
        .next()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| malformed("missing method"))?;
    let method: Method = method
        .parse()
        .map_err(|_| malformed(format!("bad method {method:?}")))?;
    let target = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| malformed("missing request target"))?
        .to_string();
    let version = match parts.next() {
        Some("HTTP/1.1") => Version::HTTP_11,
        Some("HTTP/1.0") => Version::HTTP_10,
        Some(other) => return Err(malformed(format!("unsupported version {other:?}"))),
        None => return Err(malformed("missing HTTP version")),
    };
    if parts.next().is_some() {
        return Err(malformed("extra tokens on request line"));
    }

    let mut headers = HeaderVec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(malformed("obsolete header folding"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("header line without ':': {line:?}")))?;
        if name.is_empty() || name.contains(' ') {
            return Err(malformed(format!("bad header name {name:?}")));
        }
        headers.push((
            Arc::from(name.to_ascii_lowercase()),
            value.trim().to_string(),
        ));
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.clone(), None),
    };

    let find = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    };

    // Transfer-encoding governs framing when both it and content-length are
    // present.
    let chunked = find("transfer-encoding")
        .map(|te| te.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false);
    let body = if chunked {
        BodyStrategy::Chunked
    } else {
        match find("content-length") {
            Some(raw) => {
                let n: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| malformed(format!("bad content-length {raw:?}")))?;
                if n > 0 {
                    BodyStrategy::Fixed(n)
                } else {
                    BodyStrategy::None
                }
            }
            None => BodyStrategy::None,
        }
    };

    let keep_alive = match find("connection").map(str::to_ascii_lowercase) {
        Some(c) if c.split(',').any(|t| t.trim() == "close") => false,
        Some(c) if c.split(',').any(|t| t.trim() == "keep-alive") => true,
        _ => version == Version::HTTP_11,
    };

    Ok(RequestHead {
        method,
        target,
        path,
        query,
        version,
        headers,
        keep_alive,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> RequestHead {
        parse_head(raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_request_line() {
        let h = head("GET /pets/42?limit=5 HTTP/1.1\r\nHost: example.com");
        assert_eq!(h.method, Method::GET);
        assert_eq!(h.path, "/pets/42");
        assert_eq!(h.query.as_deref(), Some("limit=5"));
        assert_eq!(h.version, Version::HTTP_11);
        assert_eq!(h.host(), Some("example.com"));
    }

    #[test]
    fn test_header_names_lowercased() {
        let h = head("GET / HTTP/1.1\r\nX-Custom-Header:  spaced  ");
        assert_eq!(h.header("x-custom-header"), Some("spaced"));
        assert_eq!(h.header("X-Custom-Header"), Some("spaced"));
    }

    #[test]
    fn test_body_strategy_fixed() {
        let h = head("POST /x HTTP/1.1\r\nContent-Length: 12");
        assert_eq!(h.body, BodyStrategy::Fixed(12));
    }

    #[test]
    fn test_body_strategy_none_for_zero_length() {
        let h = head("POST /x HTTP/1.1\r\nContent-Length: 0");
        assert_eq!(h.body, BodyStrategy::None);
    }

    #[test]
    fn test_chunked_wins_over_content_length() {
        let h = head(
            "POST /x HTTP/1.1\r\nContent-Length: 12\r\nTransfer-Encoding: chunked",
        );
        assert_eq!(h.body, BodyStrategy::Chunked);
    }

    #[test]
    fn test_keep_alive_defaults() {
        assert!(head("GET / HTTP/1.1\r\nHost: a").keep_alive);
        assert!(!head("GET / HTTP/1.0\r\nHost: a").keep_alive);
        assert!(!head("GET / HTTP/1.1\r\nConnection: close").keep_alive);
        assert!(head("GET / HTTP/1.0\r\nConnection: keep-alive").keep_alive);
    }

    #[test]
    fn test_accept_preference_order() {
        let h = head("GET / HTTP/1.1\r\nAccept: text/html;q=0.8, application/json, text/plain;q=0");
        let accept = h.accept();
        assert_eq!(accept.len(), 2);
        assert_eq!(accept[0].as_str(), "application/json");
        assert_eq!(accept[1].as_str(), "text/html");
    }

    #[test]
    fn test_missing_accept_is_empty() {
        assert!(head("GET / HTTP/1.1\r\nHost: a").accept().is_empty());
    }

    #[test]
    fn test_malformed_heads_rejected() {
        assert!(parse_head(b"GET\r\nHost: a").is_err());
        assert!(parse_head(b"GET / HTTP/2.0\r\nHost: a").is_err());
        assert!(parse_head(b"GET / HTTP/1.1\r\nbroken header line").is_err());
        assert!(parse_head(b"POST / HTTP/1.1\r\nContent-Length: twelve").is_err());
    }
}
