//! Server-wide counters.
//!
//! Passive collection only - nothing here ever blocks or rejects a request.
//! All counters use atomic operations with relaxed ordering; the numbers are
//! eventually consistent and extremely cheap to record.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Counters shared by the accept loop and every connection coroutine.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    connections_active: AtomicUsize,
    requests_framed: AtomicU64,
    framing_errors: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection refused at accept time because the concurrency cap was
    /// reached.
    pub fn record_reject(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_request(&self, latency: Duration) {
        self.requests_framed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn connections_rejected(&self) -> u64 {
        self.connections_rejected.load(Ordering::Relaxed)
    }

    pub fn connections_active(&self) -> usize {
        self.connections_active.load(Ordering::Relaxed)
    }

    pub fn requests_framed(&self) -> u64 {
        self.requests_framed.load(Ordering::Relaxed)
    }

    pub fn framing_errors(&self) -> u64 {
        self.framing_errors.load(Ordering::Relaxed)
    }

    /// Mean request latency across all framed requests; zero before the
    /// first request completes.
    pub fn average_latency(&self) -> Duration {
        let count = self.requests_framed.load(Ordering::Relaxed);
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }
}
