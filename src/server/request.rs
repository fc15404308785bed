//! Assembles a [`HandlerRequest`] from a framed head and a registry
//! resolution.

use std::sync::Arc;

use tracing::debug;

use crate::framing::RequestHead;
use crate::handler::{HandlerRequest, HeaderVec, ParamVec};
use crate::ids::{ConnectionId, RequestId};

/// Parse the `Cookie` header into name/value pairs.
pub fn parse_cookies(head: &RequestHead) -> HeaderVec {
    head.header("cookie")
        .map(|c| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((Arc::from(name), value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse and URL-decode the query string.
pub fn parse_query_params(query: Option<&str>) -> ParamVec {
    let Some(query) = query else {
        return ParamVec::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (Arc::from(k.as_ref()), v.to_string()))
        .collect()
}

/// Build the request a handler sees.
///
/// The request id comes from the client's `X-Request-Id` header when it
/// parses, otherwise a fresh one is generated.
pub fn build_handler_request(
    head: &RequestHead,
    path_params: ParamVec,
    connection_id: ConnectionId,
) -> HandlerRequest {
    let request_id = RequestId::from_header_or_new(head.header("x-request-id"));
    let query_params = parse_query_params(head.query.as_deref());
    let cookies = parse_cookies(head);

    debug!(
        request_id = %request_id,
        conn_id = %connection_id,
        method = %head.method,
        path = %head.path,
        path_params = ?path_params,
        query_count = query_params.len(),
        cookie_count = cookies.len(),
        "Handler request assembled"
    );

    HandlerRequest {
        request_id,
        connection_id,
        method: head.method.clone(),
        path: head.path.clone(),
        path_params,
        query_params,
        headers: head.headers.clone(),
        cookies,
    }
}
