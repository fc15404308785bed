//! The handler registry façade - registration and the dispatch hot path.
//!
//! Composes the host table, route trie, method table, and content-type
//! table behind two operations: [`HandlerRegistry::register`] and
//! [`HandlerRegistry::resolve`]. Registration may run concurrently with
//! resolution on any number of connections; the node graph underneath is
//! additive-only and publishes every new node atomically.

use http::Method;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::error::{RegistrationError, ResolveError};
use super::host::{HostKey, HostTable};
use super::method::{InsertOutcome, MediaType};
use super::record::{ApiRef, HandlerRecord, ReplacementPolicy};
use crate::handler::{Handler, ParamVec};
use crate::observer::{RequestObserver, ResponseObserver};
use crate::template::PathTemplate;

/// One registration, built up with the `with_*` methods and submitted to
/// [`HandlerRegistry::register`].
pub struct Registration {
    host: String,
    template: String,
    open_end: bool,
    method: Method,
    content_type: Option<MediaType>,
    policy: ReplacementPolicy,
    api: ApiRef,
    handler: Arc<dyn Handler>,
    error_handler: Option<Arc<dyn Handler>>,
    status_handlers: Vec<(u16, Arc<dyn Handler>)>,
    request_observers: Vec<Arc<dyn RequestObserver>>,
    response_observers: Vec<Arc<dyn ResponseObserver>>,
}

impl Registration {
    pub fn new(
        host: impl Into<String>,
        template: impl Into<String>,
        method: Method,
        handler: impl Handler + 'static,
    ) -> Self {
        Self {
            host: host.into(),
            template: template.into(),
            open_end: false,
            method,
            content_type: None,
            policy: ReplacementPolicy::default(),
            api: ApiRef::new("default"),
            handler: Arc::new(handler),
            error_handler: None,
            status_handlers: Vec::new(),
            request_observers: Vec::new(),
            response_observers: Vec::new(),
        }
    }

    /// Mark the final `{name}` segment as a catch-all binding all remaining
    /// path components.
    #[must_use]
    pub fn open_end(mut self) -> Self {
        self.open_end = true;
        self
    }

    /// Restrict this handler to one content type. Without this the handler
    /// is content-type-agnostic for its method.
    #[must_use]
    pub fn content_type(mut self, media: impl Into<MediaType>) -> Self {
        self.content_type = Some(media.into());
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: ReplacementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Name the API owning this registration, for diagnostics.
    #[must_use]
    pub fn api(mut self, name: impl Into<Arc<str>>) -> Self {
        self.api = ApiRef::new(name);
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn status_handler(mut self, status: u16, handler: impl Handler + 'static) -> Self {
        self.status_handlers.push((status, Arc::new(handler)));
        self
    }

    #[must_use]
    pub fn request_observer(mut self, observer: impl RequestObserver + 'static) -> Self {
        self.request_observers.push(Arc::new(observer));
        self
    }

    #[must_use]
    pub fn response_observer(mut self, observer: impl ResponseObserver + 'static) -> Self {
        self.response_observers.push(Arc::new(observer));
        self
    }

    fn into_record(self, template: Arc<PathTemplate>) -> (Registered, Arc<HandlerRecord>) {
        let mut record =
            HandlerRecord::new(self.api, template, self.policy, Arc::clone(&self.handler));
        if let Some(error_handler) = self.error_handler {
            record = record.with_error_handler(error_handler);
        }
        for (status, handler) in self.status_handlers {
            record = record.with_status_handler(status, handler);
        }
        for observer in self.request_observers {
            record = record.with_request_observer(observer);
        }
        for observer in self.response_observers {
            record = record.with_response_observer(observer);
        }
        (
            Registered {
                template: self.template,
                method: self.method,
                content_type: self.content_type,
                policy: self.policy,
            },
            Arc::new(record),
        )
    }
}

/// The registration coordinates still needed after the record is built.
struct Registered {
    template: String,
    method: Method,
    content_type: Option<MediaType>,
    policy: ReplacementPolicy,
}

/// A successful resolution: the selected record plus the path parameters it
/// binds, named from the record's own template.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: Arc<HandlerRecord>,
    pub path_params: ParamVec,
}

/// The public registration/lookup API.
pub struct HandlerRegistry {
    hosts: HostTable,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hosts: HostTable::default(),
        }
    }

    /// Register a handler.
    ///
    /// Validates the host and template, obtains (or race-free creates) the
    /// host's trie, and descends to the terminal slot where the replacement
    /// policy arbitrates any collision.
    ///
    /// # Errors
    ///
    /// `InvalidTemplate`, `InvalidHost`, or - under the `Fail` policy -
    /// `DuplicateRoute`. Under `Ignore` a duplicate is kept-and-logged, not
    /// an error.
    pub fn register(&self, registration: Registration) -> Result<(), RegistrationError> {
        let template = Arc::new(PathTemplate::parse(
            &registration.template,
            registration.open_end,
        )?);
        let host_key = HostKey::normalize(&registration.host)?;
        let (reg, record) = registration.into_record(Arc::clone(&template));

        let trie = self.hosts.trie_or_create(host_key.clone());
        let outcome = trie.insert(
            &template,
            reg.method.clone(),
            reg.content_type.clone(),
            record,
            reg.policy,
        )?;

        match outcome {
            InsertOutcome::Ignored => warn!(
                host = %host_key,
                method = %reg.method,
                template = %reg.template,
                policy = %reg.policy,
                "Registration ignored - existing handler kept"
            ),
            _ => info!(
                host = %host_key,
                method = %reg.method,
                template = %reg.template,
                content_type = reg.content_type.as_ref().map(|m| m.as_str()),
                replaced = outcome == InsertOutcome::Replaced,
                "Handler registered"
            ),
        }
        Ok(())
    }

    /// Resolve a request to a handler record.
    ///
    /// Never fails the connection: every failure mode is a distinct tagged
    /// reason the caller maps to an HTTP status (404/404/405/406).
    pub fn resolve(
        &self,
        host: &str,
        path: &str,
        method: &Method,
        accept: &[MediaType],
    ) -> Result<Resolution, ResolveError> {
        let match_start = Instant::now();

        let host_key = HostKey::normalize(host).map_err(|_| ResolveError::UnknownHost)?;
        let trie = self
            .hosts
            .lookup(&host_key)
            .ok_or(ResolveError::UnknownHost)?;

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let resolution = trie.resolve(&segments).ok_or(ResolveError::UnknownPath)?;
        if !resolution.node.has_methods() {
            return Err(ResolveError::UnknownPath);
        }

        let method_node = resolution
            .node
            .method(method)
            .ok_or(ResolveError::MethodNotAllowed)?;
        let record = method_node
            .resolve_content_type(accept)
            .ok_or(ResolveError::NotAcceptable)?;

        // Trie nodes are shared by parameter position, so values were
        // collected positionally; the selected record's template supplies
        // the names.
        let path_params: ParamVec = record
            .template
            .param_names()
            .zip(resolution.values.iter())
            .map(|(name, value)| (Arc::clone(name), value.clone()))
            .collect();

        let match_duration = match_start.elapsed();
        if match_duration > std::time::Duration::from_millis(1) {
            warn!(
                host = %host_key,
                method = %method,
                path = %path,
                template = %record.template.raw(),
                duration_us = match_duration.as_micros() as u64,
                "Slow route resolution detected"
            );
        } else {
            debug!(
                host = %host_key,
                method = %method,
                path = %path,
                template = %record.template.raw(),
                api = %record.api,
                path_params = ?path_params,
                duration_us = match_duration.as_micros() as u64,
                "Route resolved"
            );
        }

        Ok(Resolution {
            record,
            path_params,
        })
    }

    /// True when the template is registered (terminates at a node with at
    /// least one method) under the given host.
    pub fn contains(&self, host: &str, template: &str, open_end: bool) -> bool {
        let Ok(host_key) = HostKey::normalize(host) else {
            return false;
        };
        let Ok(template) = PathTemplate::parse(template, open_end) else {
            return false;
        };
        self.hosts
            .get(&host_key)
            .is_some_and(|trie| trie.contains(&template))
    }

    /// Number of registered host entries.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Print all registered routes to stdout, most specific template first
    /// within each host. Useful for debugging and verifying that
    /// registrations landed where expected.
    pub fn dump_routes(&self) {
        for host in self.hosts.hosts() {
            let Some(trie) = self.hosts.get(&host) else {
                continue;
            };
            let mut routes: Vec<(Method, Option<MediaType>, Arc<HandlerRecord>)> = Vec::new();
            trie.for_each_terminal(&mut |node| {
                for method in node.methods() {
                    if let Some(method_node) = node.method(&method) {
                        for (media, record) in method_node.records() {
                            routes.push((method.clone(), media, record));
                        }
                    }
                }
            });
            routes.sort_by_key(|(_, _, record)| record.template.sort_weight());
            for (method, media, record) in routes {
                match media {
                    Some(media) => println!(
                        "[route] {host} {method} {} ({media}) -> {}",
                        record.template.raw(),
                        record.api
                    ),
                    None => println!(
                        "[route] {host} {method} {} -> {}",
                        record.template.raw(),
                        record.api
                    ),
                }
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("hosts", &self.hosts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerRequest, HandlerResponse};
    use std::io;

    fn ok_handler(tag: &'static str) -> impl Handler {
        move |_req: &HandlerRequest, _body: &mut dyn io::Read| HandlerResponse::text(200, tag)
    }

    fn resolve_tag(
        registry: &HandlerRegistry,
        host: &str,
        path: &str,
        method: Method,
    ) -> Result<String, ResolveError> {
        registry
            .resolve(host, path, &method, &[])
            .map(|r| r.record.api.to_string())
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = HandlerRegistry::new();
        registry
            .register(
                Registration::new("example.com", "/pets/{id}", Method::GET, ok_handler("pets"))
                    .api("pets"),
            )
            .unwrap();

        let resolution = registry
            .resolve("example.com", "/pets/42", &Method::GET, &[])
            .unwrap();
        assert_eq!(resolution.record.api.to_string(), "pets");
        assert_eq!(resolution.path_params[0].1, "42");
    }

    #[test]
    fn test_default_port_equivalence() {
        let registry = HandlerRegistry::new();
        registry
            .register(
                Registration::new("example.com", "/pets", Method::GET, ok_handler("pets"))
                    .api("pets"),
            )
            .unwrap();

        assert!(resolve_tag(&registry, "example.com:80", "/pets", Method::GET).is_ok());
        assert_eq!(
            resolve_tag(&registry, "example.com:81", "/pets", Method::GET),
            Err(ResolveError::UnknownHost)
        );
    }

    #[test]
    fn test_wildcard_host_fallback() {
        let registry = HandlerRegistry::new();
        registry
            .register(Registration::new("*", "/pets", Method::GET, ok_handler("any")).api("any"))
            .unwrap();
        assert!(resolve_tag(&registry, "whatever.example:9999", "/pets", Method::GET).is_ok());
    }

    #[test]
    fn test_failure_taxonomy() {
        let registry = HandlerRegistry::new();
        registry
            .register(
                Registration::new("example.com", "/pets", Method::GET, ok_handler("pets"))
                    .content_type("application/json")
                    .api("pets"),
            )
            .unwrap();

        assert_eq!(
            resolve_tag(&registry, "nope.com", "/pets", Method::GET),
            Err(ResolveError::UnknownHost)
        );
        assert_eq!(
            resolve_tag(&registry, "example.com", "/cats", Method::GET),
            Err(ResolveError::UnknownPath)
        );
        assert_eq!(
            resolve_tag(&registry, "example.com", "/pets", Method::DELETE),
            Err(ResolveError::MethodNotAllowed)
        );
        assert_eq!(
            registry
                .resolve(
                    "example.com",
                    "/pets",
                    &Method::GET,
                    &[MediaType::parse("text/html")]
                )
                .map(|_| ()),
            Err(ResolveError::NotAcceptable)
        );
        assert!(registry
            .resolve(
                "example.com",
                "/pets",
                &Method::GET,
                &[MediaType::parse("application/json")]
            )
            .is_ok());
    }

    #[test]
    fn test_fail_policy_is_strict_and_keeps_original() {
        let registry = HandlerRegistry::new();
        registry
            .register(
                Registration::new("example.com", "/pets", Method::GET, ok_handler("first"))
                    .api("first"),
            )
            .unwrap();
        let err = registry.register(
            Registration::new("example.com", "/pets", Method::GET, ok_handler("second"))
                .api("second"),
        );
        assert!(matches!(err, Err(RegistrationError::DuplicateRoute { .. })));
        assert_eq!(
            resolve_tag(&registry, "example.com", "/pets", Method::GET).unwrap(),
            "first"
        );
    }

    #[test]
    fn test_ignore_policy_is_idempotent() {
        let registry = HandlerRegistry::new();
        registry
            .register(
                Registration::new("example.com", "/pets", Method::GET, ok_handler("first"))
                    .api("first")
                    .policy(ReplacementPolicy::Ignore),
            )
            .unwrap();
        registry
            .register(
                Registration::new("example.com", "/pets", Method::GET, ok_handler("second"))
                    .api("second")
                    .policy(ReplacementPolicy::Ignore),
            )
            .unwrap();
        assert_eq!(
            resolve_tag(&registry, "example.com", "/pets", Method::GET).unwrap(),
            "first"
        );
    }

    #[test]
    fn test_allow_policy_overwrites() {
        let registry = HandlerRegistry::new();
        registry
            .register(
                Registration::new("example.com", "/pets", Method::GET, ok_handler("first"))
                    .api("first"),
            )
            .unwrap();
        registry
            .register(
                Registration::new("example.com", "/pets", Method::GET, ok_handler("second"))
                    .api("second")
                    .policy(ReplacementPolicy::Allow),
            )
            .unwrap();
        assert_eq!(
            resolve_tag(&registry, "example.com", "/pets", Method::GET).unwrap(),
            "second"
        );
    }

    #[test]
    fn test_catch_all_params_named_from_record_template() {
        let registry = HandlerRegistry::new();
        registry
            .register(
                Registration::new("*", "/files/{path}", Method::GET, ok_handler("files"))
                    .open_end()
                    .api("files"),
            )
            .unwrap();

        let resolution = registry
            .resolve("example.com", "/files/a/b/c", &Method::GET, &[])
            .unwrap();
        let (name, value) = &resolution.path_params[0];
        assert_eq!(name.as_ref(), "path");
        assert_eq!(value, "a/b/c");
    }

    #[test]
    fn test_invalid_registrations_are_synchronous() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.register(Registration::new(
                "a:b:c",
                "/x",
                Method::GET,
                ok_handler("x")
            )),
            Err(RegistrationError::InvalidHost { .. })
        ));
        assert!(matches!(
            registry.register(Registration::new(
                "example.com",
                "/a//b",
                Method::GET,
                ok_handler("x")
            )),
            Err(RegistrationError::InvalidTemplate(_))
        ));
        assert_eq!(registry.host_count(), 0);
    }

    #[test]
    fn test_contains() {
        let registry = HandlerRegistry::new();
        registry
            .register(Registration::new(
                "example.com",
                "/pets/{id}",
                Method::GET,
                ok_handler("pets"),
            ))
            .unwrap();
        assert!(registry.contains("example.com", "/pets/{id}", false));
        assert!(!registry.contains("example.com", "/pets", false));
        assert!(!registry.contains("other.com", "/pets/{id}", false));
    }
}
