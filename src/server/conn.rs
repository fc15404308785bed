//! The connection driver: one coroutine per accepted TCP connection.
//!
//! Owns the socket, loops the framing engine, resolves each framed request
//! through the registry, invokes the selected record, writes the response,
//! and decides keep-alive continuation. Framing errors terminate this
//! connection only - they never propagate to, or affect, any other
//! connection.

use std::io::{self, Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use may::net::TcpStream;
use tracing::{debug, error, info, warn};

use super::request::build_handler_request;
use super::response::{resolve_error_response, write_framing_notice, write_response};
use crate::framing::{BodyReader, FramingEngine, FramingError};
use crate::handler::{Handler, HandlerRequest, HandlerResponse};
use crate::ids::ConnectionId;
use crate::metrics::ServerMetrics;
use crate::registry::{HandlerRecord, HandlerRegistry};
use crate::runtime_config::RuntimeConfig;

/// Drive one TCP connection to completion.
pub(crate) fn drive_connection(
    stream: TcpStream,
    conn_id: ConnectionId,
    registry: &HandlerRegistry,
    config: &RuntimeConfig,
    metrics: &ServerMetrics,
) {
    if let Err(err) = stream.set_read_timeout(Some(config.read_timeout)) {
        warn!(conn_id = %conn_id, error = %err, "Failed to arm receive timeout");
        return;
    }
    let mut engine = FramingEngine::new(stream, conn_id, config.framing());
    drive(&mut engine, conn_id, registry, metrics);
}

/// The request loop, generic over the transport so tests can drive it from
/// in-memory streams. Responses are written to the same transport the
/// engine reads from; reads and writes never overlap because everything on
/// a connection happens sequentially on its own coroutine.
pub(crate) fn drive<S: Read + Write>(
    engine: &mut FramingEngine<S>,
    conn_id: ConnectionId,
    registry: &HandlerRegistry,
    metrics: &ServerMetrics,
) {
    loop {
        let head = match engine.next_request() {
            Ok(Some(head)) => head,
            Ok(None) => {
                debug!(conn_id = %conn_id, "Connection closed cleanly by peer");
                break;
            }
            Err(err) => {
                fatal_framing(engine.stream_mut(), &err, conn_id, metrics);
                break;
            }
        };

        let start = Instant::now();
        let keep_alive = head.keep_alive;
        // An HTTP/1.0 request may omit Host; route it through the wildcard
        // entry rather than failing normalization.
        let host = head.host().unwrap_or("*").to_string();
        let accept = head.accept();

        let response = match registry.resolve(&host, &head.path, &head.method, &accept) {
            Err(reason) => {
                info!(
                    conn_id = %conn_id,
                    method = %head.method,
                    path = %head.path,
                    host = %host,
                    reason = reason.reason(),
                    status = reason.status_code(),
                    "Request not resolvable"
                );
                resolve_error_response(reason, head.method.as_str(), &head.path)
            }
            Ok(resolution) => {
                let record = resolution.record;
                let req = build_handler_request(&head, resolution.path_params, conn_id);
                record.request_observers.notify(&req);

                let mut response = invoke_handler(&record, &req, engine);
                if response.status >= 400 {
                    if let Some(error_handler) = record.error_handler_for(response.status) {
                        response = render_error(error_handler, &req, response);
                    }
                }

                let latency = start.elapsed();
                record.response_observers.notify(&req, &response, latency);
                info!(
                    request_id = %req.request_id,
                    conn_id = %conn_id,
                    method = %req.method,
                    path = %req.path,
                    status = response.status,
                    latency_ms = latency.as_millis() as u64,
                    "Request handled"
                );
                response
            }
        };

        // Drain whatever body the handler left and realign the buffer;
        // both must complete before the next read on this connection.
        if let Err(err) = engine.finish_request() {
            fatal_framing(engine.stream_mut(), &err, conn_id, metrics);
            break;
        }
        metrics.record_request(start.elapsed());

        if let Err(err) = write_response(engine.stream_mut(), head.version, keep_alive, &response)
        {
            debug!(conn_id = %conn_id, error = %err, "Response write failed");
            break;
        }
        if !keep_alive {
            debug!(conn_id = %conn_id, "Closing: request opted out of keep-alive");
            break;
        }
    }
}

/// Invoke the delegate with panic recovery: a panicking handler becomes a
/// 500 response, not a dead connection coroutine.
fn invoke_handler<S: Read>(
    record: &HandlerRecord,
    req: &HandlerRequest,
    engine: &mut FramingEngine<S>,
) -> HandlerResponse {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut body = BodyReader::new(engine);
        record.handler.handle(req, &mut body)
    }));
    match result {
        Ok(response) => response,
        Err(panic) => {
            error!(
                request_id = %req.request_id,
                api = %record.api,
                template = %record.template.raw(),
                panic_message = ?panic.downcast_ref::<&str>(),
                "Handler panicked - CRITICAL"
            );
            HandlerResponse::error(500, "handler panicked")
        }
    }
}

/// Let a registered error handler render the error response. The body has
/// already been claimed by the request delegate, so the error handler reads
/// end-of-stream. If it panics, the original response stands.
fn render_error(
    handler: &std::sync::Arc<dyn Handler>,
    req: &HandlerRequest,
    fallback: HandlerResponse,
) -> HandlerResponse {
    match catch_unwind(AssertUnwindSafe(|| handler.handle(req, &mut io::empty()))) {
        Ok(response) => response,
        Err(_) => {
            warn!(request_id = %req.request_id, "Error handler panicked - keeping original response");
            fallback
        }
    }
}

/// A framing failure is fatal to this connection: notify best-effort where
/// a status is still meaningful, then let the caller drop the socket.
fn fatal_framing<W: Write>(
    writer: &mut W,
    err: &FramingError,
    conn_id: ConnectionId,
    metrics: &ServerMetrics,
) {
    metrics.record_framing_error();
    warn!(conn_id = %conn_id, error = %err, "Connection terminated by framing error");
    if let Some(status) = err.notify_status() {
        let _ = write_framing_notice(writer, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FramingConfig;
    use crate::registry::Registration;
    use http::Method;

    /// In-memory transport: reads from a scripted input, captures writes.
    struct Duplex {
        input: Vec<u8>,
        pos: usize,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: &[u8]) -> Self {
            Self {
                input: input.to_vec(),
                pos: 0,
                output: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let n = (self.input.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn registry() -> HandlerRegistry {
        let registry = HandlerRegistry::new();
        registry
            .register(Registration::new("*", "/echo", Method::POST, echo_body).api("echo"))
            .unwrap();
        registry
            .register(
                Registration::new(
                    "*",
                    "/ping",
                    Method::GET,
                    |_req: &HandlerRequest, _body: &mut dyn Read| HandlerResponse::text(200, "pong"),
                )
                .api("ping"),
            )
            .unwrap();
        registry
            .register(
                Registration::new(
                    "*",
                    "/lazy",
                    Method::POST,
                    // Ignores its body entirely.
                    |_req: &HandlerRequest, _body: &mut dyn Read| HandlerResponse::text(200, "lazy"),
                )
                .api("lazy"),
            )
            .unwrap();
        registry
    }

    fn echo_body(_req: &HandlerRequest, body: &mut dyn Read) -> HandlerResponse {
        let mut buf = Vec::new();
        body.read_to_end(&mut buf).unwrap();
        HandlerResponse::new(200, Default::default(), buf)
    }

    fn run_with(registry: &HandlerRegistry, wire: &[u8], config: FramingConfig) -> (String, u64) {
        let mut engine = FramingEngine::new(Duplex::new(wire), ConnectionId::next(), config);
        let metrics = ServerMetrics::new();
        drive(&mut engine, ConnectionId::next(), registry, &metrics);
        let errors = metrics.framing_errors();
        let out = String::from_utf8(std::mem::take(&mut engine.stream_mut().output)).unwrap();
        (out, errors)
    }

    fn run(registry: &HandlerRegistry, wire: &[u8]) -> String {
        run_with(registry, wire, FramingConfig::default()).0
    }

    #[test]
    fn test_single_request_response() {
        let out = run(&registry(), b"GET /ping HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("pong"));
    }

    #[test]
    fn test_pipelined_requests_answered_in_order() {
        let wire = b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /ping HTTP/1.1\r\nHost: x\r\n\r\n";
        let out = run(&registry(), wire);
        let first = out.find("abc").unwrap();
        let second = out.find("pong").unwrap();
        assert!(first < second);
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[test]
    fn test_undrained_body_does_not_corrupt_pipeline() {
        let wire = b"POST /lazy HTTP/1.1\r\nContent-Length: 11\r\n\r\nignored bitGET /ping HTTP/1.1\r\nHost: x\r\n\r\n";
        let out = run(&registry(), wire);
        assert!(out.contains("lazy"));
        assert!(out.contains("pong"));
    }

    #[test]
    fn test_unknown_path_is_404_and_connection_survives() {
        let wire = b"GET /missing HTTP/1.1\r\nHost: x\r\n\r\nGET /ping HTTP/1.1\r\nHost: x\r\n\r\n";
        let out = run(&registry(), wire);
        assert!(out.contains("HTTP/1.1 404 Not Found"));
        assert!(out.contains("pong"));
    }

    #[test]
    fn test_method_not_allowed_and_not_acceptable() {
        let reg = HandlerRegistry::new();
        reg.register(
            Registration::new(
                "*",
                "/data",
                Method::GET,
                |_req: &HandlerRequest, _body: &mut dyn Read| HandlerResponse::text(200, "data"),
            )
            .content_type("application/json")
            .api("data"),
        )
        .unwrap();

        let out = run(&reg, b"DELETE /data HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(out.contains("HTTP/1.1 405"));

        let out = run(
            &reg,
            b"GET /data HTTP/1.1\r\nHost: x\r\nAccept: text/html\r\n\r\n",
        );
        assert!(out.contains("HTTP/1.1 406"));

        let out = run(
            &reg,
            b"GET /data HTTP/1.1\r\nHost: x\r\nAccept: application/json\r\n\r\n",
        );
        assert!(out.contains("HTTP/1.1 200"));
    }

    #[test]
    fn test_handler_panic_becomes_500() {
        let reg = HandlerRegistry::new();
        reg.register(
            Registration::new(
                "*",
                "/boom",
                Method::GET,
                |_req: &HandlerRequest, _body: &mut dyn Read| -> HandlerResponse {
                    panic!("kaboom")
                },
            )
            .api("boom"),
        )
        .unwrap();
        let out = run(&reg, b"GET /boom HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(out.contains("HTTP/1.1 500"));
    }

    #[test]
    fn test_status_error_handler_renders_response() {
        let reg = HandlerRegistry::new();
        reg.register(
            Registration::new(
                "*",
                "/teapot",
                Method::GET,
                |_req: &HandlerRequest, _body: &mut dyn Read| {
                    HandlerResponse::error(418, "short and stout")
                },
            )
            .status_handler(418, |_req: &HandlerRequest, _body: &mut dyn Read| {
                HandlerResponse::text(418, "custom teapot page")
            })
            .api("teapot"),
        )
        .unwrap();
        let out = run(&reg, b"GET /teapot HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(out.contains("custom teapot page"));
    }

    #[test]
    fn test_oversized_header_notified_and_closed() {
        let reg = registry();
        let mut wire = Vec::from(&b"GET /ping HTTP/1.1\r\nX-Filler: "[..]);
        wire.extend(std::iter::repeat(b'a').take(8192));
        let (out, framing_errors) = run_with(
            &reg,
            &wire,
            FramingConfig {
                max_header_bytes: 1024,
                read_buffer_bytes: 512,
            },
        );
        assert!(out.starts_with("HTTP/1.1 431"));
        assert_eq!(framing_errors, 1);
    }

    #[test]
    fn test_connection_close_honored() {
        let wire =
            b"GET /ping HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\nGET /ping HTTP/1.1\r\n\r\n";
        let out = run(&registry(), wire);
        // Only the first request is answered.
        assert_eq!(out.matches("pong").count(), 1);
        assert!(out.contains("Connection: close"));
    }
}
