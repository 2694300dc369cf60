use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::error::Result;

/// An immutable route pattern: either an exact path or a regular expression.
///
/// Equality follows the pattern's raw value. Literals compare by text.
/// Regex patterns compare by identity of the compiled regex, so a clone of a
/// pattern equals the original while two patterns compiled from the same
/// source text do not.
#[derive(Debug, Clone)]
pub enum RoutePattern {
    Literal(String),
    Regex(Arc<Regex>),
}

/// Flags applied when compiling a regex pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
}

/// Which variant a pattern is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Literal,
    Regex,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Literal => f.write_str("literal"),
            PatternKind::Regex => f.write_str("regex"),
        }
    }
}

/// Borrowed view of the value a pattern was built from.
#[derive(Debug, Clone, Copy)]
pub enum RawPattern<'a> {
    Literal(&'a str),
    Regex(&'a Regex),
}

/// Result of matching a path against a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The full path that was matched.
    pub path: String,
    /// Group `0` is the whole match, followed by numbered capture groups.
    /// Groups that did not participate are `None`.
    pub groups: Vec<Option<String>>,
}

impl RoutePattern {
    pub fn literal(path: impl Into<String>) -> Self {
        RoutePattern::Literal(path.into())
    }

    /// Compile `expr` into a regex pattern.
    pub fn regex(expr: &str) -> Result<Self> {
        Self::regex_with_flags(expr, RegexFlags::default())
    }

    pub fn regex_with_flags(expr: &str, flags: RegexFlags) -> Result<Self> {
        let regex = RegexBuilder::new(expr)
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .build()?;
        Ok(RoutePattern::Regex(Arc::new(regex)))
    }

    /// Wrap an already compiled regex.
    pub fn from_regex(regex: Regex) -> Self {
        RoutePattern::Regex(Arc::new(regex))
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            RoutePattern::Literal(_) => PatternKind::Literal,
            RoutePattern::Regex(_) => PatternKind::Regex,
        }
    }

    pub fn raw(&self) -> RawPattern<'_> {
        match self {
            RoutePattern::Literal(text) => RawPattern::Literal(text),
            RoutePattern::Regex(regex) => RawPattern::Regex(regex),
        }
    }

    pub fn is_match(&self, path: &str) -> bool {
        match self {
            RoutePattern::Literal(text) => text == path,
            RoutePattern::Regex(regex) => regex.is_match(path),
        }
    }

    /// Match `path`, returning the captured groups on success.
    ///
    /// A literal match reports the path as its only group.
    pub fn captures(&self, path: &str) -> Option<RouteMatch> {
        match self {
            RoutePattern::Literal(text) => (text == path).then(|| RouteMatch {
                path: path.to_string(),
                groups: vec![Some(path.to_string())],
            }),
            RoutePattern::Regex(regex) => {
                let caps = regex.captures(path)?;
                Some(RouteMatch {
                    path: path.to_string(),
                    groups: caps
                        .iter()
                        .map(|group| group.map(|m| m.as_str().to_string()))
                        .collect(),
                })
            }
        }
    }
}

impl PartialEq for RoutePattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RoutePattern::Literal(a), RoutePattern::Literal(b)) => a == b,
            (RoutePattern::Regex(a), RoutePattern::Regex(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for RoutePattern {}

impl From<&str> for RoutePattern {
    fn from(path: &str) -> Self {
        RoutePattern::literal(path)
    }
}

impl From<String> for RoutePattern {
    fn from(path: String) -> Self {
        RoutePattern::Literal(path)
    }
}

impl From<Regex> for RoutePattern {
    fn from(regex: Regex) -> Self {
        RoutePattern::from_regex(regex)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePattern::Literal(text) => f.write_str(text),
            RoutePattern::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouteError;

    #[test]
    fn test_literal_matches_exact_path_only() {
        let pattern = RoutePattern::literal("/users");
        assert!(pattern.is_match("/users"));
        assert!(!pattern.is_match("/users/1"));
        assert!(!pattern.is_match("/Users"));
    }

    #[test]
    fn test_literal_captures_whole_path() {
        let pattern = RoutePattern::literal("/ping");
        let info = pattern.captures("/ping").unwrap();
        assert_eq!(info.path, "/ping");
        assert_eq!(info.groups, vec![Some("/ping".to_string())]);
        assert!(pattern.captures("/pong").is_none());
    }

    #[test]
    fn test_regex_captures_groups() {
        let pattern = RoutePattern::regex(r"^/users/(\d+)(/edit)?$").unwrap();
        let info = pattern.captures("/users/42").unwrap();
        assert_eq!(info.path, "/users/42");
        assert_eq!(
            info.groups,
            vec![Some("/users/42".to_string()), Some("42".to_string()), None]
        );
        assert!(pattern.captures("/users/abc").is_none());
    }

    #[test]
    fn test_regex_flags() {
        let pattern = RoutePattern::regex_with_flags(
            "^/api$",
            RegexFlags {
                case_insensitive: true,
                multi_line: true,
            },
        )
        .unwrap();
        assert!(pattern.is_match("/API"));
        assert!(pattern.is_match("first\n/Api\nlast"));
    }

    #[test]
    fn test_invalid_regex_fails_fast() {
        let result = RoutePattern::regex("(unclosed");
        assert!(matches!(result, Err(RouteError::InvalidRegex(_))));
    }

    #[test]
    fn test_literal_equality_is_by_value() {
        assert_eq!(RoutePattern::literal("/a"), RoutePattern::from("/a"));
        assert_ne!(RoutePattern::literal("/a"), RoutePattern::literal("/b"));
    }

    #[test]
    fn test_regex_equality_is_by_identity() {
        let first = RoutePattern::regex("^/a$").unwrap();
        let second = RoutePattern::regex("^/a$").unwrap();
        assert_eq!(first, first.clone());
        assert_ne!(first, second);
    }

    #[test]
    fn test_literal_never_equals_regex() {
        let literal = RoutePattern::literal("^/a$");
        let regex = RoutePattern::regex("^/a$").unwrap();
        assert_ne!(literal, regex);
        assert_eq!(regex.kind(), PatternKind::Regex);
        assert!(matches!(literal.raw(), RawPattern::Literal("^/a$")));
    }
}
