//! Route matching for chanproxy.
//!
//! A [`RoutePattern`] decides whether a request path is handled by a route.
//! Conditions test a [`Mail`] envelope by its destination URL and can be
//! combined with [`ConditionGroup`].

pub mod condition;
pub mod error;
pub mod mail;
pub mod pattern;

pub use condition::{
    Condition, ConditionGroup, ConditionOperator, UrlRegexCondition, UrlStringCondition,
};
pub use error::{Result, RouteError};
pub use mail::Mail;
pub use pattern::{PatternKind, RawPattern, RegexFlags, RouteMatch, RoutePattern};
