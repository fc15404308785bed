//! The TCP server: accept loop, per-connection driver, and HTTP/1.1
//! request/response plumbing on top of the framing engine.

mod conn;
mod http_server;
mod request;
mod response;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{build_handler_request, parse_cookies, parse_query_params};
pub use response::{resolve_error_response, write_response};
