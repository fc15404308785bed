//! # Railyard
//!
//! **Railyard** is a coroutine-powered HTTP/1.1 server stack for Rust built
//! on the `may` runtime: raw TCP connection acceptance, an incremental
//! request framing engine supporting pipelining and chunked
//! transfer-encoding, and a concurrent dispatch registry that resolves every
//! request to the single best-matching handler by hostname, path template,
//! HTTP method, and content type.
//!
//! ## Overview
//!
//! Two subsystems carry the real complexity:
//!
//! - the **registry** - potentially thousands of registered path templates
//!   (literals, `{name}` parameters, trailing catch-alls, content-type
//!   specific variants) resolved with deterministic tie-breaking, while
//!   registrations keep landing concurrently with live traffic;
//! - the **framing engine** - one per connection, consuming bytes off the
//!   socket incrementally, locating header boundaries, selecting the
//!   body-length strategy, and preserving leftover bytes across pipelined
//!   requests without ever losing or duplicating a byte.
//!
//! ## Architecture
//!
//! - **[`template`]** - route template parsing into typed segments
//! - **[`registry`]** - host table → route trie → method table →
//!   content-type table behind the [`HandlerRegistry`] façade
//! - **[`framing`]** - the per-connection framing state machine, request
//!   head parser, and chunked decoder
//! - **[`server`]** - accept loop, connection driver, response writer
//! - **[`handler`]** - the `Handler` trait and hot-path request/response types
//! - **[`observer`]** - request/response logger lists with per-observer
//!   panic isolation
//! - **[`metrics`]** - passive atomic server counters
//! - **[`runtime_config`]** - environment-driven runtime limits
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Accept as Accept Loop
//!     participant Conn as Connection Driver<br/>(coroutine)
//!     participant Framing as FramingEngine
//!     participant Registry as HandlerRegistry
//!     participant Handler
//!
//!     Client->>Accept: TCP connect
//!     Accept->>Accept: Cap check<br/>(reject, never queue)
//!     Accept->>Conn: spawn coroutine
//!     loop keep-alive
//!         Conn->>Framing: next_request()
//!         Framing->>Framing: scan for \r\n\r\n<br/>(bounded by ceiling)
//!         Framing-->>Conn: RequestHead + body strategy
//!         Conn->>Registry: resolve(host, path, method, accept)
//!         alt no match
//!             Registry-->>Client: 404 / 405 / 406
//!         end
//!         Registry-->>Conn: HandlerRecord + path params
//!         Conn->>Handler: handle(request, body stream)
//!         Handler-->>Conn: HandlerResponse
//!         Conn->>Framing: finish_request()<br/>drain + shift leftover
//!         Conn-->>Client: response bytes
//!     end
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use http::Method;
//! use railyard::{HandlerRegistry, HandlerResponse, HttpServer, Registration};
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry
//!     .register(Registration::new(
//!         "*",
//!         "/pets/{id}",
//!         Method::GET,
//!         |req: &railyard::HandlerRequest, _body: &mut dyn std::io::Read| {
//!             HandlerResponse::json(
//!                 200,
//!                 serde_json::json!({ "pet": req.get_path_param("id") }),
//!             )
//!         },
//!     ))
//!     .expect("registration failed");
//!
//! let server = HttpServer::new(registry);
//! let handle = server.start("0.0.0.0:8080").expect("bind failed");
//! handle.join().expect("server crashed");
//! ```
//!
//! ## Concurrency Model
//!
//! One lightweight `may` coroutine per accepted connection, capped by
//! `RAILYARD_MAX_CONNECTIONS`; connections beyond the cap are rejected at
//! accept time. The registry's node graph is the only state shared across
//! connections. It is additive-only - nodes are never removed, and every
//! new node is published atomically - so request dispatch never takes a
//! lock. Only leaf handler-record slots are ever replaced, and only under
//! an explicit replacement policy.
//!
//! ## Runtime Considerations
//!
//! Railyard uses the `may` coroutine runtime, not tokio or async-std:
//!
//! - Handlers run on the connection's coroutine; socket reads are the only
//!   suspension points
//! - Stack size is configurable via `RAILYARD_STACK_SIZE`
//! - Blocking operations inside handlers should use `may`'s facilities

pub mod echo;
pub mod framing;
pub mod handler;
pub mod ids;
pub mod metrics;
pub mod observer;
pub mod registry;
pub mod runtime_config;
pub mod server;
pub mod template;

pub use framing::{FramingConfig, FramingEngine, FramingError, RequestHead};
pub use handler::{Handler, HandlerRequest, HandlerResponse};
pub use registry::{
    HandlerRegistry, MediaType, Registration, RegistrationError, ReplacementPolicy, Resolution,
    ResolveError,
};
pub use runtime_config::RuntimeConfig;
pub use server::{HttpServer, ServerHandle};
pub use template::{PathTemplate, Segment};
