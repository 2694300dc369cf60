use crate::pattern::PatternKind;

/// Errors that can occur while building routes and conditions.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The regular expression could not be compiled.
    #[error("invalid route regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// A condition was built from the wrong kind of pattern.
    #[error("expected a {expected} pattern, got a {found} pattern")]
    WrongPatternKind {
        expected: PatternKind,
        found: PatternKind,
    },

    /// A condition operator other than `and` / `or`.
    #[error("unknown condition operator: {0:?}")]
    InvalidOperator(String),
}

pub type Result<T> = std::result::Result<T, RouteError>;
