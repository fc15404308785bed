//! Route template parsing - the first stop for every registration.
//!
//! A template string like `/users/{id}/posts` is parsed once, at registration
//! time, into a sequence of typed [`Segment`]s. The trie in
//! [`crate::registry`] is built from that sequence; request paths never touch
//! this module.
//!
//! Segment syntax:
//! - `users` matches exactly one path component equal to `users`
//! - `{id}` matches exactly one path component and binds it to `id`
//! - a final `{rest}` registered with the open-end flag binds all remaining
//!   components as one slash-joined value (the template syntax alone is
//!   ambiguous, so the caller states the intent explicitly)

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Matches a `{name}` parameter component. The name may not be empty and may
/// not contain `/`, `{` or `}`.
static PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\{([^/{}]+)\}$").expect("param regex is valid")
});

/// One component of a parsed route template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches exactly one path component equal to the text.
    Literal(Arc<str>),
    /// Matches exactly one path component, bound to the name.
    Parameter(Arc<str>),
    /// Matches one-or-more remaining components, bound as their slash-joined
    /// concatenation. Only legal as the final segment.
    CatchAll(Arc<str>),
}

impl Segment {
    pub fn is_literal(&self) -> bool {
        matches!(self, Segment::Literal(_))
    }

    /// The bound parameter name, if this segment binds one.
    pub fn param_name(&self) -> Option<&Arc<str>> {
        match self {
            Segment::Literal(_) => None,
            Segment::Parameter(name) | Segment::CatchAll(name) => Some(name),
        }
    }
}

/// Template parse failures, surfaced to the registering caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template {template:?} must start with '/'")]
    MissingLeadingSlash { template: String },
    #[error("template {template:?} contains an empty segment")]
    EmptySegment { template: String },
    #[error("template {template:?} has a malformed parameter segment {segment:?}")]
    MalformedParameter { template: String, segment: String },
    #[error("template {template:?}: open-end flag requires a final parameter segment")]
    OpenEndWithoutParameter { template: String },
}

/// An ordered sequence of segments parsed from a template string.
///
/// The original template text is retained for diagnostics; node sharing in
/// the trie is by literal sequence plus parameter *positions*, never by
/// parameter names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template string into typed segments.
    ///
    /// `open_end` marks the final `{name}` segment as a catch-all. It is an
    /// explicit flag because `/files/{path}` is valid both as a single-segment
    /// parameter route and as a catch-all route.
    ///
    /// # Errors
    ///
    /// Fails when the template does not start with `/`, contains an empty
    /// segment (double slash) other than the root, contains a malformed or
    /// empty-named `{}` component, or sets `open_end` without a final
    /// parameter segment.
    pub fn parse(template: &str, open_end: bool) -> Result<Self, TemplateError> {
        if !template.starts_with('/') {
            return Err(TemplateError::MissingLeadingSlash {
                template: template.to_string(),
            });
        }

        let mut segments = Vec::new();
        if template != "/" {
            for component in template[1..].split('/') {
                if component.is_empty() {
                    return Err(TemplateError::EmptySegment {
                        template: template.to_string(),
                    });
                }
                if component.contains('{') || component.contains('}') {
                    let caps =
                        PARAM_RE
                            .captures(component)
                            .ok_or_else(|| TemplateError::MalformedParameter {
                                template: template.to_string(),
                                segment: component.to_string(),
                            })?;
                    segments.push(Segment::Parameter(Arc::from(&caps[1])));
                } else {
                    segments.push(Segment::Literal(Arc::from(component)));
                }
            }
        }

        if open_end {
            match segments.pop() {
                Some(Segment::Parameter(name)) => segments.push(Segment::CatchAll(name)),
                _ => {
                    return Err(TemplateError::OpenEndWithoutParameter {
                        template: template.to_string(),
                    })
                }
            }
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// The original template string, kept for diagnostics and logging.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parameter names in binding order (parameters, then the catch-all if
    /// present). Used to name positionally-collected values after a record
    /// has been selected.
    pub fn param_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.segments.iter().filter_map(|s| s.param_name())
    }

    /// Specificity used to order templates wherever more than one could
    /// structurally match the same request: fewer parameters beats more,
    /// then a longer literal remainder beats a shorter one.
    pub fn sort_weight(&self) -> SortWeight {
        let params = self
            .segments
            .iter()
            .filter(|s| s.param_name().is_some())
            .count();
        let literal_len = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(text) => Some(text.len()),
                _ => None,
            })
            .sum();
        SortWeight {
            params,
            literal_len,
        }
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Total specificity order over templates. Smaller sorts first (more
/// specific): fewest parameters, then longest stripped-literal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortWeight {
    pub params: usize,
    pub literal_len: usize,
}

impl Ord for SortWeight {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.params
            .cmp(&other.params)
            .then(other.literal_len.cmp(&self.literal_len))
    }
}

impl PartialOrd for SortWeight {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals_and_params() {
        let t = PathTemplate::parse("/users/{id}/posts", false).unwrap();
        assert_eq!(t.segments().len(), 3);
        assert_eq!(t.segments()[0], Segment::Literal(Arc::from("users")));
        assert_eq!(t.segments()[1], Segment::Parameter(Arc::from("id")));
        assert_eq!(t.segments()[2], Segment::Literal(Arc::from("posts")));
    }

    #[test]
    fn test_parse_root() {
        let t = PathTemplate::parse("/", false).unwrap();
        assert!(t.segments().is_empty());
    }

    #[test]
    fn test_open_end_marks_catch_all() {
        let t = PathTemplate::parse("/files/{path}", true).unwrap();
        assert_eq!(t.segments()[1], Segment::CatchAll(Arc::from("path")));
    }

    #[test]
    fn test_open_end_requires_final_parameter() {
        let err = PathTemplate::parse("/files/all", true).unwrap_err();
        assert!(matches!(err, TemplateError::OpenEndWithoutParameter { .. }));
    }

    #[test]
    fn test_empty_segment_rejected() {
        let err = PathTemplate::parse("/a//b", false).unwrap_err();
        assert!(matches!(err, TemplateError::EmptySegment { .. }));
    }

    #[test]
    fn test_empty_param_name_rejected() {
        let err = PathTemplate::parse("/a/{}", false).unwrap_err();
        assert!(matches!(err, TemplateError::MalformedParameter { .. }));
    }

    #[test]
    fn test_unbalanced_braces_rejected() {
        assert!(PathTemplate::parse("/a/{id", false).is_err());
        assert!(PathTemplate::parse("/a/id}", false).is_err());
        assert!(PathTemplate::parse("/a/x{id}", false).is_err());
    }

    #[test]
    fn test_sort_weight_orders_by_specificity() {
        let literal = PathTemplate::parse("/users/admin", false).unwrap();
        let param = PathTemplate::parse("/users/{id}", false).unwrap();
        let short_literal = PathTemplate::parse("/u/{id}", false).unwrap();
        assert!(literal.sort_weight() < param.sort_weight());
        assert!(param.sort_weight() < short_literal.sort_weight());
    }

    #[test]
    fn test_param_names_in_binding_order() {
        let t = PathTemplate::parse("/a/{x}/b/{y}", false).unwrap();
        let names: Vec<&str> = t.param_names().map(|n| n.as_ref()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }
}
