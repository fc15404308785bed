//! Request/response observer lists.
//!
//! A handler record carries a list of observer callbacks (request loggers,
//! response loggers). Observers are invoked sequentially with isolated error
//! handling per observer: a panicking observer is logged and skipped, and
//! the remaining observers still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::handler::{HandlerRequest, HandlerResponse};

/// Observes requests after they have been resolved to a handler, before the
/// handler runs.
pub trait RequestObserver: Send + Sync {
    fn on_request(&self, req: &HandlerRequest);
}

impl<F> RequestObserver for F
where
    F: Fn(&HandlerRequest) + Send + Sync,
{
    fn on_request(&self, req: &HandlerRequest) {
        self(req)
    }
}

/// Observes responses after the handler (or an error handler) has produced
/// one, before it is written to the socket.
pub trait ResponseObserver: Send + Sync {
    fn on_response(&self, req: &HandlerRequest, res: &HandlerResponse, latency: Duration);
}

impl<F> ResponseObserver for F
where
    F: Fn(&HandlerRequest, &HandlerResponse, Duration) + Send + Sync,
{
    fn on_response(&self, req: &HandlerRequest, res: &HandlerResponse, latency: Duration) {
        self(req, res, latency)
    }
}

/// An ordered list of observers sharing one trait.
///
/// Cheap to clone (the list is an `Arc` slice under the hood once built) and
/// immutable after construction, like the record that owns it.
pub struct ObserverSet<T: ?Sized> {
    observers: Vec<Arc<T>>,
}

impl<T: ?Sized> Clone for ObserverSet<T> {
    fn clone(&self) -> Self {
        Self {
            observers: self.observers.clone(),
        }
    }
}

impl<T: ?Sized> Default for ObserverSet<T> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
        }
    }
}

impl<T: ?Sized> ObserverSet<T> {
    pub fn push(&mut self, observer: Arc<T>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

impl ObserverSet<dyn RequestObserver> {
    /// Invoke every observer in order. A panic in one observer is caught and
    /// logged; the rest still run.
    pub fn notify(&self, req: &HandlerRequest) {
        for (idx, obs) in self.observers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| obs.on_request(req))).is_err() {
                warn!(
                    request_id = %req.request_id,
                    observer_idx = idx,
                    "Request observer panicked - skipped"
                );
            }
        }
    }
}

impl ObserverSet<dyn ResponseObserver> {
    /// Invoke every observer in order with panic isolation.
    pub fn notify(&self, req: &HandlerRequest, res: &HandlerResponse, latency: Duration) {
        for (idx, obs) in self.observers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| obs.on_response(req, res, latency))).is_err() {
                warn!(
                    request_id = %req.request_id,
                    observer_idx = idx,
                    "Response observer panicked - skipped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ConnectionId, RequestId};
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> HandlerRequest {
        HandlerRequest {
            request_id: RequestId::new(),
            connection_id: ConnectionId::next(),
            method: Method::GET,
            path: "/".to_string(),
            path_params: Default::default(),
            query_params: Default::default(),
            headers: Default::default(),
            cookies: Default::default(),
        }
    }

    #[test]
    fn test_panicking_observer_does_not_suppress_the_rest() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let mut set: ObserverSet<dyn RequestObserver> = ObserverSet::default();
        set.push(Arc::new(|_req: &HandlerRequest| {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }));
        set.push(Arc::new(|_req: &HandlerRequest| {
            panic!("observer failure");
        }));
        set.push(Arc::new(|_req: &HandlerRequest| {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }));

        set.notify(&request());
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_response_observers_see_latency() {
        static SEEN_MS: AtomicUsize = AtomicUsize::new(0);

        let mut set: ObserverSet<dyn ResponseObserver> = ObserverSet::default();
        set.push(Arc::new(
            |_req: &HandlerRequest, _res: &HandlerResponse, latency: Duration| {
                SEEN_MS.store(latency.as_millis() as usize, Ordering::SeqCst);
            },
        ));

        let res = HandlerResponse::text(200, "ok");
        set.notify(&request(), &res, Duration::from_millis(7));
        assert_eq!(SEEN_MS.load(Ordering::SeqCst), 7);
    }
}
