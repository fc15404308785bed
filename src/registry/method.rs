//! Per-route-node method and content-type tables.
//!
//! Once the trie walk lands on a route node, a [`MethodNode`] decides which
//! [`HandlerRecord`] actually applies: a method either carries one
//! content-type-agnostic record or a map of content-type-specific records -
//! never both. The mutual exclusivity is enforced at registration time so
//! the request path never has to arbitrate between the two kinds.

use arc_swap::ArcSwapOption;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::error::RegistrationError;
use super::record::{HandlerRecord, ReplacementPolicy};

/// A normalized media type: lowercase, parameters (`; charset=...`) stripped.
///
/// Used both as the registration key and as the elements of a request's
/// parsed accept list, so equality is exact string equality after
/// normalization. Wildcard ranges (`*/*`, `text/*`) are not given special
/// matching semantics; an agnostic registration is the way to accept
/// anything.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MediaType(Arc<str>);

impl MediaType {
    pub fn parse(raw: &str) -> Self {
        let essence = raw.split(';').next().unwrap_or(raw).trim();
        Self(Arc::from(essence.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MediaType({})", self.0)
    }
}

impl From<&str> for MediaType {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Outcome of a leaf-slot insertion, reported for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced,
    Ignored,
}

/// The per-method handler table of one route node.
///
/// Readers are lock-free: the agnostic slot is an `ArcSwapOption` load and
/// the content-type map is a `DashMap` read. Writers serialize on a private
/// mutex so the agnostic-XOR-content-type invariant is checked and applied
/// atomically; registration is rare relative to dispatch, so writers paying
/// for a lock the readers never touch is the right trade.
pub struct MethodNode {
    agnostic: ArcSwapOption<HandlerRecord>,
    by_media: DashMap<MediaType, Arc<HandlerRecord>>,
    write_lock: Mutex<()>,
}

impl Default for MethodNode {
    fn default() -> Self {
        Self {
            agnostic: ArcSwapOption::from(None),
            by_media: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }
}

impl MethodNode {
    /// Register a record for this method.
    ///
    /// `content_type = None` registers the content-type-agnostic record;
    /// `Some(media)` inserts into the content-type map. Either way the
    /// replacement policy arbitrates collisions, and registering across the
    /// agnostic/content-type boundary is a collision: under `Allow` the new
    /// registration wins wholesale and the other side is cleared.
    pub fn add_handler(
        &self,
        content_type: Option<MediaType>,
        record: Arc<HandlerRecord>,
        policy: ReplacementPolicy,
    ) -> Result<InsertOutcome, RegistrationError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        match content_type {
            None => {
                let occupied = self.agnostic.load().is_some() || !self.by_media.is_empty();
                if occupied {
                    match policy {
                        ReplacementPolicy::Fail => {
                            return Err(self.duplicate(&record, "method"));
                        }
                        ReplacementPolicy::Ignore => return Ok(InsertOutcome::Ignored),
                        ReplacementPolicy::Allow => {
                            self.by_media.clear();
                            self.agnostic.store(Some(record));
                            return Ok(InsertOutcome::Replaced);
                        }
                    }
                }
                self.agnostic.store(Some(record));
                Ok(InsertOutcome::Inserted)
            }
            Some(media) => {
                if self.agnostic.load().is_some() {
                    match policy {
                        ReplacementPolicy::Fail => {
                            return Err(self.duplicate(&record, media.as_str()));
                        }
                        ReplacementPolicy::Ignore => return Ok(InsertOutcome::Ignored),
                        ReplacementPolicy::Allow => {
                            // The content-type-specific registration takes
                            // over; the agnostic record is retired.
                            self.agnostic.store(None);
                        }
                    }
                }
                match self.by_media.entry(media) {
                    Entry::Occupied(mut occupied) => match policy {
                        ReplacementPolicy::Fail => Err(self.duplicate(&record, "content type")),
                        ReplacementPolicy::Ignore => Ok(InsertOutcome::Ignored),
                        ReplacementPolicy::Allow => {
                            occupied.insert(record);
                            Ok(InsertOutcome::Replaced)
                        }
                    },
                    Entry::Vacant(vacant) => {
                        vacant.insert(record);
                        Ok(InsertOutcome::Inserted)
                    }
                }
            }
        }
    }

    fn duplicate(&self, incoming: &HandlerRecord, slot: &str) -> RegistrationError {
        let occupied = self
            .agnostic
            .load_full()
            .map(|r| r.api.to_string())
            .or_else(|| self.by_media.iter().next().map(|e| e.value().api.to_string()))
            .unwrap_or_else(|| "existing handler".to_string());
        debug!(
            template = %incoming.template.raw(),
            slot = slot,
            occupied_by = %occupied,
            "Registration rejected as duplicate"
        );
        RegistrationError::DuplicateRoute {
            template: incoming.template.raw().to_string(),
            occupied,
        }
    }

    /// Select the record for a client's accept list.
    ///
    /// Walks the acceptable content types in client preference order and
    /// returns the first one registered; falls back to the agnostic record;
    /// returns `None` when neither applies (the caller reports
    /// `NotAcceptable`).
    pub fn resolve_content_type(&self, accept: &[MediaType]) -> Option<Arc<HandlerRecord>> {
        for media in accept {
            if let Some(record) = self.by_media.get(media) {
                return Some(Arc::clone(record.value()));
            }
        }
        self.agnostic.load_full()
    }

    /// True when nothing has ever been registered for this method.
    pub fn is_empty(&self) -> bool {
        self.agnostic.load().is_none() && self.by_media.is_empty()
    }

    /// Snapshot of the registered content types (agnostic excluded).
    pub fn content_types(&self) -> Vec<MediaType> {
        self.by_media.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every record registered for this method, keyed by the
    /// content type it serves (`None` = agnostic).
    pub fn records(&self) -> Vec<(Option<MediaType>, Arc<HandlerRecord>)> {
        let mut records: Vec<(Option<MediaType>, Arc<HandlerRecord>)> = self
            .by_media
            .iter()
            .map(|e| (Some(e.key().clone()), Arc::clone(e.value())))
            .collect();
        if let Some(agnostic) = self.agnostic.load_full() {
            records.push((None, agnostic));
        }
        records
    }

    /// The agnostic record, if one is registered.
    pub fn agnostic(&self) -> Option<Arc<HandlerRecord>> {
        self.agnostic.load_full()
    }
}

impl fmt::Debug for MethodNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodNode")
            .field("agnostic", &self.agnostic.load().is_some())
            .field("content_types", &self.by_media.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, HandlerRequest, HandlerResponse};
    use crate::registry::record::ApiRef;
    use crate::template::PathTemplate;
    use std::io;

    fn record(api: &str) -> Arc<HandlerRecord> {
        let template = Arc::new(PathTemplate::parse("/pets", false).unwrap());
        let handler: Arc<dyn Handler> = Arc::new(
            |_req: &HandlerRequest, _body: &mut dyn io::Read| HandlerResponse::text(200, "ok"),
        );
        Arc::new(HandlerRecord::new(
            ApiRef::new(api.to_string()),
            template,
            ReplacementPolicy::Fail,
            handler,
        ))
    }

    #[test]
    fn test_accept_order_breaks_ties() {
        let node = MethodNode::default();
        node.add_handler(
            Some(MediaType::parse("application/json")),
            record("json"),
            ReplacementPolicy::Fail,
        )
        .unwrap();
        node.add_handler(
            Some(MediaType::parse("text/html")),
            record("html"),
            ReplacementPolicy::Fail,
        )
        .unwrap();

        let accept = vec![MediaType::parse("text/html"), MediaType::parse("application/json")];
        let selected = node.resolve_content_type(&accept).unwrap();
        assert_eq!(selected.api.to_string(), "html");
    }

    #[test]
    fn test_agnostic_fallback() {
        let node = MethodNode::default();
        node.add_handler(None, record("any"), ReplacementPolicy::Fail)
            .unwrap();
        let accept = vec![MediaType::parse("application/xml")];
        assert_eq!(
            node.resolve_content_type(&accept).unwrap().api.to_string(),
            "any"
        );
    }

    #[test]
    fn test_no_acceptable_content_type() {
        let node = MethodNode::default();
        node.add_handler(
            Some(MediaType::parse("application/json")),
            record("json"),
            ReplacementPolicy::Fail,
        )
        .unwrap();
        let accept = vec![MediaType::parse("application/xml")];
        assert!(node.resolve_content_type(&accept).is_none());
    }

    #[test]
    fn test_agnostic_and_specific_are_mutually_exclusive() {
        let node = MethodNode::default();
        node.add_handler(None, record("any"), ReplacementPolicy::Fail)
            .unwrap();
        let err = node.add_handler(
            Some(MediaType::parse("application/json")),
            record("json"),
            ReplacementPolicy::Fail,
        );
        assert!(matches!(
            err,
            Err(RegistrationError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn test_allow_replaces_across_kinds() {
        let node = MethodNode::default();
        node.add_handler(
            Some(MediaType::parse("application/json")),
            record("json"),
            ReplacementPolicy::Fail,
        )
        .unwrap();
        let outcome = node
            .add_handler(None, record("any"), ReplacementPolicy::Allow)
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Replaced);
        assert!(node.content_types().is_empty());
        assert_eq!(node.agnostic().unwrap().api.to_string(), "any");
    }

    #[test]
    fn test_ignore_keeps_original() {
        let node = MethodNode::default();
        node.add_handler(None, record("first"), ReplacementPolicy::Fail)
            .unwrap();
        let outcome = node
            .add_handler(None, record("second"), ReplacementPolicy::Ignore)
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Ignored);
        assert_eq!(node.agnostic().unwrap().api.to_string(), "first");
    }

    #[test]
    fn test_media_type_normalization() {
        assert_eq!(
            MediaType::parse("Application/JSON; charset=utf-8").as_str(),
            "application/json"
        );
    }
}
