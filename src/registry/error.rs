//! Registration and resolution failure taxonomy.
//!
//! Registration errors are thrown synchronously to the registering caller,
//! typically at startup. Resolution failures are returned by value as a
//! tagged enum so the request dispatch path never pays for exception-style
//! control flow.

use crate::template::TemplateError;

/// Errors surfaced to a caller registering a handler.
///
/// Fatal to that registration call only; the registry is left exactly as it
/// was before the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The route template string failed to parse.
    #[error("invalid route template: {0}")]
    InvalidTemplate(#[from] TemplateError),

    /// The host string failed normalization (more than one colon, or a
    /// non-numeric port that is not `*`).
    #[error("invalid host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    /// A conflicting handler already occupies the slot and the replacement
    /// policy is `Fail`.
    #[error("duplicate route: {occupied} already registered for {template}")]
    DuplicateRoute { template: String, occupied: String },
}

/// Why a request could not be resolved to a handler.
///
/// Each variant maps to the HTTP status code the response writer owes the
/// client; this mapping is the registry's contract with its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// No host entry (exact or wildcard) matched the request's host header.
    UnknownHost,
    /// The host matched but no route node matched the path.
    UnknownPath,
    /// The route node exists but has no handler for the request method.
    MethodNotAllowed,
    /// The method table exists but none of the client's acceptable content
    /// types are registered and there is no content-type-agnostic handler.
    NotAcceptable,
}

impl ResolveError {
    /// The HTTP status code the caller should answer with.
    pub fn status_code(self) -> u16 {
        match self {
            ResolveError::UnknownHost | ResolveError::UnknownPath => 404,
            ResolveError::MethodNotAllowed => 405,
            ResolveError::NotAcceptable => 406,
        }
    }

    /// Stable reason tag used in error response bodies and log events.
    pub fn reason(self) -> &'static str {
        match self {
            ResolveError::UnknownHost => "unknown host",
            ResolveError::UnknownPath => "unknown path",
            ResolveError::MethodNotAllowed => "method not allowed",
            ResolveError::NotAcceptable => "content type not acceptable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(ResolveError::UnknownHost.status_code(), 404);
        assert_eq!(ResolveError::UnknownPath.status_code(), 404);
        assert_eq!(ResolveError::MethodNotAllowed.status_code(), 405);
        assert_eq!(ResolveError::NotAcceptable.status_code(), 406);
    }
}
