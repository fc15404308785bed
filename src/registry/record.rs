//! Handler records and the replacement policy.
//!
//! A [`HandlerRecord`] is the immutable bundle stored at a registry leaf:
//! the request delegate plus its error handlers, observer lists, owning API
//! reference, and the policy that governed its registration. Records are
//! replaced wholesale under the `Allow` policy - never field-mutated - so a
//! concurrent reader always sees a complete record.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handler::Handler;
use crate::observer::{ObserverSet, RequestObserver, ResponseObserver};
use crate::template::PathTemplate;

/// What happens when a second handler is registered for an already-occupied
/// (host, template, method, content-type) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementPolicy {
    /// Reject the duplicate registration with `DuplicateRoute`.
    #[default]
    Fail,
    /// Overwrite the existing handler (last writer wins).
    Allow,
    /// Keep the existing handler; log and discard the new one. Not an error.
    Ignore,
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementPolicy::Fail => f.write_str("Fail"),
            ReplacementPolicy::Allow => f.write_str("Allow"),
            ReplacementPolicy::Ignore => f.write_str("Ignore"),
        }
    }
}

/// Lightweight identity of the API that owns a registration, carried for
/// diagnostics and log events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiRef {
    pub name: Arc<str>,
}

impl ApiRef {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for ApiRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Immutable bundle of a request delegate and its companions.
///
/// Built once at registration via the `with_*` builder methods and then
/// shared behind an `Arc`; the registry replaces the whole record when the
/// `Allow` policy permits it.
#[derive(Clone)]
pub struct HandlerRecord {
    /// The request delegate.
    pub handler: Arc<dyn Handler>,
    /// Default error handler, consulted when no per-status handler matches.
    pub error_handler: Option<Arc<dyn Handler>>,
    /// Per-status error handlers (e.g. a custom 404 page renderer).
    pub status_handlers: HashMap<u16, Arc<dyn Handler>>,
    /// Request loggers, invoked before the delegate.
    pub request_observers: ObserverSet<dyn RequestObserver>,
    /// Response loggers, invoked after a response is produced.
    pub response_observers: ObserverSet<dyn ResponseObserver>,
    /// The API that registered this handler.
    pub api: ApiRef,
    /// Policy the registration was made under.
    pub policy: ReplacementPolicy,
    /// The original template, retained for diagnostics and for naming
    /// positionally-bound path parameters.
    pub template: Arc<PathTemplate>,
}

impl HandlerRecord {
    pub fn new(
        api: ApiRef,
        template: Arc<PathTemplate>,
        policy: ReplacementPolicy,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            handler,
            error_handler: None,
            status_handlers: HashMap::new(),
            request_observers: ObserverSet::default(),
            response_observers: ObserverSet::default(),
            api,
            policy,
            template,
        }
    }

    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_status_handler(mut self, status: u16, handler: Arc<dyn Handler>) -> Self {
        self.status_handlers.insert(status, handler);
        self
    }

    #[must_use]
    pub fn with_request_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.request_observers.push(observer);
        self
    }

    #[must_use]
    pub fn with_response_observer(mut self, observer: Arc<dyn ResponseObserver>) -> Self {
        self.response_observers.push(observer);
        self
    }

    /// The error handler responsible for the given status, if any: the
    /// per-status handler first, then the record's default.
    pub fn error_handler_for(&self, status: u16) -> Option<&Arc<dyn Handler>> {
        self.status_handlers
            .get(&status)
            .or(self.error_handler.as_ref())
    }
}

impl fmt::Debug for HandlerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRecord")
            .field("api", &self.api)
            .field("template", &self.template.raw())
            .field("policy", &self.policy)
            .field("status_handlers", &self.status_handlers.keys())
            .field("request_observers", &self.request_observers.len())
            .field("response_observers", &self.response_observers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerRequest, HandlerResponse};
    use std::io;

    fn noop() -> Arc<dyn Handler> {
        Arc::new(|_req: &HandlerRequest, _body: &mut dyn io::Read| HandlerResponse::text(200, "ok"))
    }

    fn record() -> HandlerRecord {
        let template = Arc::new(PathTemplate::parse("/pets/{id}", false).unwrap());
        HandlerRecord::new(
            ApiRef::new("pets"),
            template,
            ReplacementPolicy::Fail,
            noop(),
        )
    }

    #[test]
    fn test_error_handler_precedence() {
        let not_found = noop();
        let fallback = noop();
        let rec = record()
            .with_status_handler(404, Arc::clone(&not_found))
            .with_error_handler(Arc::clone(&fallback));

        assert!(Arc::ptr_eq(rec.error_handler_for(404).unwrap(), &not_found));
        assert!(Arc::ptr_eq(rec.error_handler_for(500).unwrap(), &fallback));
    }

    #[test]
    fn test_no_error_handler_registered() {
        assert!(record().error_handler_for(500).is_none());
    }
}
