//! HTTP/1.1 response serialization.

use http::Version;
use std::io::{self, Write};

use crate::handler::HandlerResponse;
use crate::registry::ResolveError;

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Serialize a response to the socket.
///
/// `Content-Length` and `Connection` are owned by the driver (they encode
/// framing and keep-alive decisions); matching headers from the handler are
/// dropped rather than emitted twice.
pub fn write_response(
    w: &mut impl Write,
    version: Version,
    keep_alive: bool,
    res: &HandlerResponse,
) -> io::Result<()> {
    let version = if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    };
    let mut out = Vec::with_capacity(256 + res.body.len());
    write!(
        out,
        "{} {} {}\r\n",
        version,
        res.status,
        status_reason(res.status)
    )?;
    for (name, value) in &res.headers {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        write!(out, "{}: {}\r\n", name, value)?;
    }
    write!(out, "Content-Length: {}\r\n", res.body.len())?;
    write!(
        out,
        "Connection: {}\r\n",
        if keep_alive { "keep-alive" } else { "close" }
    )?;
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&res.body);
    w.write_all(&out)?;
    w.flush()
}

/// JSON error body for a resolution failure, carrying the reason tag the
/// registry reported.
pub fn resolve_error_response(err: ResolveError, method: &str, path: &str) -> HandlerResponse {
    HandlerResponse::json(
        err.status_code(),
        serde_json::json!({
            "error": err.reason(),
            "method": method,
            "path": path,
        }),
    )
}

/// Best-effort notification before a framing failure drops the connection.
/// No body - the client is non-conformant or abusive and owes us nothing
/// more than a status line.
pub fn write_framing_notice(w: &mut impl Write, status: u16) -> io::Result<()> {
    let mut out = Vec::with_capacity(64);
    write!(
        out,
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status,
        status_reason(status)
    )?;
    w.write_all(&out)?;
    w.flush()
}
