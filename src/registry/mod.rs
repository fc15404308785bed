//! Concurrent handler registry: host table → route trie → method table →
//! content-type table, behind the [`HandlerRegistry`] façade.

mod core;
mod error;
mod host;
mod method;
mod record;
mod trie;

pub use self::core::{HandlerRegistry, Registration, Resolution};
pub use error::{RegistrationError, ResolveError};
pub use host::{HostKey, HostTable, Port, DEFAULT_PORT};
pub use method::{InsertOutcome, MediaType, MethodNode};
pub use record::{ApiRef, HandlerRecord, ReplacementPolicy};
pub use trie::{ParamValues, RouteNode, RouteResolution, RouteTrie};
