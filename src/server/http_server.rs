//! The TCP accept loop and server lifecycle handle.
//!
//! One lightweight `may` coroutine per accepted connection, capped by the
//! configured maximum; connections beyond the cap are rejected at accept
//! time - dropped, never queued - so a saturated server stays predictable.

use may::coroutine::{self, JoinHandle};
use may::net::TcpListener;
use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use super::conn::drive_connection;
use crate::ids::ConnectionId;
use crate::metrics::ServerMetrics;
use crate::registry::HandlerRegistry;
use crate::runtime_config::RuntimeConfig;

/// The HTTP server: a handler registry plus runtime limits, ready to bind.
pub struct HttpServer {
    registry: Arc<HandlerRegistry>,
    config: RuntimeConfig,
    metrics: Arc<ServerMetrics>,
}

impl HttpServer {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: Arc<HandlerRegistry>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            config,
            metrics: Arc::new(ServerMetrics::new()),
        }
    }

    /// The server's metrics, shared with the handle returned by `start`.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Bind and start serving on the given address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be
    /// bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;

        let registry = Arc::clone(&self.registry);
        let config = self.config;
        let metrics = Arc::clone(&self.metrics);

        info!(
            addr = %addr,
            max_connections = config.max_connections,
            max_header_bytes = config.max_header_bytes,
            read_timeout_ms = config.read_timeout.as_millis() as u64,
            "Server listening"
        );

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the
        // may runtime. The accept loop owns only Arc-shared state, and the
        // closure is Send + 'static, so the coroutine cannot outlive its
        // captures.
        let handle = unsafe {
            coroutine::Builder::new()
                .stack_size(config.stack_size)
                .spawn(move || accept_loop(listener, registry, config, metrics))
        }
        .map_err(|e| io::Error::other(format!("failed to spawn accept loop: {e}")))?;

        Ok(ServerHandle {
            addr,
            handle,
            metrics: self.metrics,
        })
    }
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<HandlerRegistry>,
    config: RuntimeConfig,
    metrics: Arc<ServerMetrics>,
) {
    let active = Arc::new(AtomicUsize::new(0));

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "Accept failed");
                continue;
            }
        };

        if active.load(Ordering::Acquire) >= config.max_connections {
            metrics.record_reject();
            warn!(
                max_connections = config.max_connections,
                "Connection rejected - concurrency cap reached"
            );
            drop(stream);
            continue;
        }

        let conn_id = ConnectionId::next();
        metrics.record_accept();
        active.fetch_add(1, Ordering::AcqRel);

        let registry = Arc::clone(&registry);
        let metrics_for_conn = Arc::clone(&metrics);
        let active_for_conn = Arc::clone(&active);

        // SAFETY: same spawn contract as the accept loop; the connection
        // coroutine owns its stream and Arc-shared state only.
        let spawn_result = unsafe {
            coroutine::Builder::new()
                .stack_size(config.stack_size)
                .spawn(move || {
                    let _guard = ConnGuard {
                        active: active_for_conn,
                        metrics: Arc::clone(&metrics_for_conn),
                    };
                    drive_connection(stream, conn_id, &registry, &config, &metrics_for_conn);
                })
        };

        if let Err(err) = spawn_result {
            // Resources exhausted; shed this connection rather than crash.
            error!(conn_id = %conn_id, error = %err, "Failed to spawn connection coroutine");
            active.fetch_sub(1, Ordering::AcqRel);
            metrics.record_close();
        }
    }
}

/// Decrements the live-connection accounting however the connection
/// coroutine exits.
struct ConnGuard {
    active: Arc<AtomicUsize>,
    metrics: Arc<ServerMetrics>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.metrics.record_close();
    }
}

/// Handle to a running server.
///
/// Provides methods for waiting until the server is ready, stopping it, or
/// joining the accept-loop coroutine.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    metrics: Arc<ServerMetrics>,
}

impl ServerHandle {
    /// The bound address (useful when binding port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Wait for the server to accept connections.
    ///
    /// Polls the bound address with TCP connects; useful in tests to avoid
    /// racing the accept loop.
    ///
    /// # Errors
    ///
    /// `TimedOut` if the server isn't ready within ~250ms (50 × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if StdTcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop the accept loop and wait for it to finish.
    ///
    /// In-flight connections run to completion on their own coroutines;
    /// only the accept loop is cancelled.
    pub fn stop(self) {
        // SAFETY: cancelling the accept-loop coroutine during shutdown is
        // the intended use; the handle is valid because we own it.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
    }

    /// Block until the accept loop exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept-loop coroutine panicked.
    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}
