//! Concurrent route trie - hot path for request routing.
//!
//! One trie per host entry. Each level of the trie is keyed by one path
//! segment: literal children live in a concurrent map, and each node holds
//! one reserved parameter-child slot and one reserved catch-all slot. Nodes
//! are created lazily on registration and never deleted, which is what makes
//! lock-free concurrent reads safe: a reader either sees a child as absent
//! or as fully formed, never in between.
//!
//! Resolution precedence at every depth, independently: literal beats
//! parameter beats catch-all. A more-specific subtree that dead-ends deeper
//! is backtracked out of, and a catch-all always short-circuits, binding all
//! remaining segments as one slash-joined value.

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use http::Method;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::error::RegistrationError;
use super::method::{InsertOutcome, MediaType, MethodNode};
use super::record::{HandlerRecord, ReplacementPolicy};
use crate::handler::MAX_INLINE_PARAMS;
use crate::template::{PathTemplate, Segment};

/// Positional parameter values collected during a trie walk, in template
/// order. Named only after a record has been selected, from that record's
/// retained template - trie nodes are shared by parameter position, not by
/// parameter name.
pub type ParamValues = SmallVec<[String; MAX_INLINE_PARAMS]>;

/// A parameter or catch-all child slot. The stored name is the first
/// registrant's, kept for diagnostics; binding names come from the matched
/// record's template.
struct ParamChild {
    name: Arc<str>,
    node: Arc<RouteNode>,
}

/// One level of the route trie.
pub struct RouteNode {
    /// Template prefix down to this node (first registrant's spelling).
    path: String,
    literals: DashMap<String, Arc<RouteNode>>,
    param: ArcSwapOption<ParamChild>,
    catch_all: ArcSwapOption<ParamChild>,
    methods: DashMap<Method, Arc<MethodNode>>,
}

impl RouteNode {
    fn new(path: String) -> Self {
        Self {
            path,
            literals: DashMap::new(),
            param: ArcSwapOption::from(None),
            catch_all: ArcSwapOption::from(None),
            methods: DashMap::new(),
        }
    }

    /// Template prefix this node sits under, for diagnostics.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True once any method has been registered at this node (i.e. the node
    /// is a route terminal, not just an interior level).
    pub fn has_methods(&self) -> bool {
        !self.methods.is_empty()
    }

    /// The method table for a request method, if one exists.
    pub fn method(&self, method: &Method) -> Option<Arc<MethodNode>> {
        self.methods.get(method).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of the methods registered at this node.
    pub fn methods(&self) -> Vec<Method> {
        self.methods.iter().map(|e| e.key().clone()).collect()
    }

    fn literal_child_or_create(&self, text: &str) -> Arc<RouteNode> {
        // DashMap's entry API is the atomic get-or-create: concurrent
        // registrations of sibling templates never lose a node.
        Arc::clone(
            self.literals
                .entry(text.to_string())
                .or_insert_with(|| Arc::new(RouteNode::new(format!("{}/{}", self.path, text))))
                .value(),
        )
    }

    fn slot_child_or_create(
        slot: &ArcSwapOption<ParamChild>,
        name: &Arc<str>,
        path: String,
    ) -> Arc<RouteNode> {
        if let Some(existing) = slot.load_full() {
            if existing.name != *name {
                debug!(
                    slot_name = %existing.name,
                    registered_name = %name,
                    node_path = %existing.node.path,
                    "Parameter slot shared across differing names (positional identity)"
                );
            }
            return Arc::clone(&existing.node);
        }
        let fresh = Arc::new(ParamChild {
            name: Arc::clone(name),
            node: Arc::new(RouteNode::new(path)),
        });
        // Publish-or-read-winner: the slot is add-only, so a failed swap
        // means another registration fully published its child first.
        let prev = slot.compare_and_swap(&None::<Arc<ParamChild>>, Some(Arc::clone(&fresh)));
        match prev.as_ref() {
            None => Arc::clone(&fresh.node),
            Some(winner) => Arc::clone(&winner.node),
        }
    }

    fn param_child_or_create(&self, name: &Arc<str>) -> Arc<RouteNode> {
        Self::slot_child_or_create(&self.param, name, format!("{}/{{{}}}", self.path, name))
    }

    fn catch_all_child_or_create(&self, name: &Arc<str>) -> Arc<RouteNode> {
        Self::slot_child_or_create(
            &self.catch_all,
            name,
            format!("{}/{{{}...}}", self.path, name),
        )
    }
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("path", &self.path)
            .field("literals", &self.literals.len())
            .field("has_param", &self.param.load().is_some())
            .field("has_catch_all", &self.catch_all.load().is_some())
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Result of a successful trie walk: the terminal node plus positional
/// parameter values.
#[derive(Debug)]
pub struct RouteResolution {
    pub node: Arc<RouteNode>,
    pub values: ParamValues,
}

/// The route trie of one host entry.
///
/// Stateless between calls - all state lives in the node graph, which is
/// additive-only. Insertions may run concurrently with resolutions on any
/// number of connections.
pub struct RouteTrie {
    root: Arc<RouteNode>,
}

impl Default for RouteTrie {
    fn default() -> Self {
        Self {
            root: Arc::new(RouteNode::new(String::new())),
        }
    }
}

impl RouteTrie {
    /// Descend the trie one segment at a time, creating nodes as needed, and
    /// register the record at the terminal node's method table.
    pub fn insert(
        &self,
        template: &Arc<PathTemplate>,
        method: Method,
        content_type: Option<MediaType>,
        record: Arc<HandlerRecord>,
        policy: ReplacementPolicy,
    ) -> Result<InsertOutcome, RegistrationError> {
        let mut node = Arc::clone(&self.root);
        for segment in template.segments() {
            node = match segment {
                Segment::Literal(text) => node.literal_child_or_create(text),
                Segment::Parameter(name) => node.param_child_or_create(name),
                Segment::CatchAll(name) => node.catch_all_child_or_create(name),
            };
        }
        let method_node = Arc::clone(
            node.methods
                .entry(method)
                .or_insert_with(|| Arc::new(MethodNode::default()))
                .value(),
        );
        method_node.add_handler(content_type, record, policy)
    }

    /// Walk the segments left to right.
    ///
    /// At each level the child kinds are tried in precedence order: exact
    /// literal first, then the parameter child (binding one segment), then
    /// the catch-all child (binding all remaining segments and terminating
    /// the walk immediately). A more-specific subtree that dead-ends deeper
    /// is backtracked out of, so a catch-all sibling still serves the paths
    /// its more-specific neighbors cannot. Returns `None` when nothing
    /// matches structurally, including trailing segments left over at a node
    /// with no further children.
    pub fn resolve(&self, segments: &[&str]) -> Option<RouteResolution> {
        let mut values = ParamValues::new();
        let node = Self::search(&self.root, segments, &mut values)?;
        Some(RouteResolution { node, values })
    }

    fn search(
        node: &Arc<RouteNode>,
        segments: &[&str],
        values: &mut ParamValues,
    ) -> Option<Arc<RouteNode>> {
        let Some((&segment, remaining)) = segments.split_first() else {
            return Some(Arc::clone(node));
        };

        if let Some(child) = node.literals.get(segment).map(|e| Arc::clone(e.value())) {
            if let Some(found) = Self::search(&child, remaining, values) {
                return Some(found);
            }
        }
        if let Some(param) = node.param.load_full() {
            values.push(segment.to_string());
            if let Some(found) = Self::search(&param.node, remaining, values) {
                return Some(found);
            }
            // Backtrack: the parameter subtree dead-ended.
            values.pop();
        }
        if let Some(catch_all) = node.catch_all.load_full() {
            values.push(segments.join("/"));
            return Some(Arc::clone(&catch_all.node));
        }
        None
    }

    /// Read-only lookup of the node a template terminates at, without
    /// creating anything. Safe to call concurrently with `insert`.
    pub fn get(&self, template: &PathTemplate) -> Option<Arc<RouteNode>> {
        let mut node = Arc::clone(&self.root);
        for segment in template.segments() {
            node = match segment {
                Segment::Literal(text) => node.literals.get(text.as_ref()).map(|e| Arc::clone(e.value()))?,
                Segment::Parameter(_) => Arc::clone(&node.param.load_full()?.node),
                Segment::CatchAll(_) => Arc::clone(&node.catch_all.load_full()?.node),
            };
        }
        Some(node)
    }

    /// True when the template terminates at a node with at least one
    /// registered method.
    pub fn contains(&self, template: &PathTemplate) -> bool {
        self.get(template).is_some_and(|node| node.has_methods())
    }

    /// Visit every terminal node under this trie (snapshot view per level).
    pub fn for_each_terminal(&self, f: &mut impl FnMut(&Arc<RouteNode>)) {
        Self::visit(&self.root, f);
    }

    fn visit(node: &Arc<RouteNode>, f: &mut impl FnMut(&Arc<RouteNode>)) {
        if node.has_methods() {
            f(node);
        }
        for child in node.literals.iter() {
            Self::visit(child.value(), f);
        }
        if let Some(param) = node.param.load_full() {
            Self::visit(&param.node, f);
        }
        if let Some(catch_all) = node.catch_all.load_full() {
            Self::visit(&catch_all.node, f);
        }
    }
}

impl fmt::Debug for RouteTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTrie").field("root", &self.root).finish()
    }
}
