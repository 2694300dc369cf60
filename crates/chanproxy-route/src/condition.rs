use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;

use crate::error::{Result, RouteError};
use crate::mail::Mail;
use crate::pattern::{PatternKind, RoutePattern};

/// A predicate over some input.
pub trait Condition<T>: Send + Sync {
    fn matches(&self, input: &T) -> bool;
}

impl<T, F> Condition<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn matches(&self, input: &T) -> bool {
        self(input)
    }
}

/// Matches mail whose destination `href` equals a URL string exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlStringCondition {
    url: String,
}

impl UrlStringCondition {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TryFrom<RoutePattern> for UrlStringCondition {
    type Error = RouteError;

    fn try_from(pattern: RoutePattern) -> Result<Self> {
        match pattern {
            RoutePattern::Literal(url) => Ok(Self { url }),
            other => Err(RouteError::WrongPatternKind {
                expected: PatternKind::Literal,
                found: other.kind(),
            }),
        }
    }
}

impl<T: Send + Sync> Condition<Mail<T>> for UrlStringCondition {
    fn matches(&self, mail: &Mail<T>) -> bool {
        mail.to.as_ref().is_some_and(|to| to.as_str() == self.url)
    }
}

/// Matches mail whose destination `href` satisfies a regex.
#[derive(Debug, Clone)]
pub struct UrlRegexCondition {
    regex: Arc<Regex>,
}

impl UrlRegexCondition {
    pub fn new(regex: Regex) -> Self {
        Self {
            regex: Arc::new(regex),
        }
    }
}

impl TryFrom<RoutePattern> for UrlRegexCondition {
    type Error = RouteError;

    fn try_from(pattern: RoutePattern) -> Result<Self> {
        match pattern {
            RoutePattern::Regex(regex) => Ok(Self { regex }),
            other => Err(RouteError::WrongPatternKind {
                expected: PatternKind::Regex,
                found: other.kind(),
            }),
        }
    }
}

impl<T: Send + Sync> Condition<Mail<T>> for UrlRegexCondition {
    fn matches(&self, mail: &Mail<T>) -> bool {
        mail.to
            .as_ref()
            .is_some_and(|to| self.regex.is_match(to.as_str()))
    }
}

/// How a [`ConditionGroup`] combines its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    And,
    Or,
}

impl FromStr for ConditionOperator {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("and") {
            Ok(ConditionOperator::And)
        } else if s.eq_ignore_ascii_case("or") {
            Ok(ConditionOperator::Or)
        } else {
            Err(RouteError::InvalidOperator(s.to_string()))
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionOperator::And => f.write_str("and"),
            ConditionOperator::Or => f.write_str("or"),
        }
    }
}

/// A set of conditions joined by one operator.
///
/// An empty `And` group matches everything; an empty `Or` group matches
/// nothing. Evaluation stops at the first member that decides the result.
pub struct ConditionGroup<T> {
    pub operator: ConditionOperator,
    conditions: Vec<Box<dyn Condition<T>>>,
}

impl<T> ConditionGroup<T> {
    pub fn new(operator: ConditionOperator) -> Self {
        Self {
            operator,
            conditions: Vec::new(),
        }
    }

    pub fn push(&mut self, condition: impl Condition<T> + 'static) -> &mut Self {
        self.conditions.push(Box::new(condition));
        self
    }

    pub fn with(mut self, condition: impl Condition<T> + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl<T> Condition<T> for ConditionGroup<T> {
    fn matches(&self, input: &T) -> bool {
        match self.operator {
            ConditionOperator::And => self.conditions.iter().all(|c| c.matches(input)),
            ConditionOperator::Or => self.conditions.iter().any(|c| c.matches(input)),
        }
    }
}

impl<T> fmt::Debug for ConditionGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionGroup")
            .field("operator", &self.operator)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn mail_to(url: &str) -> Mail<()> {
        Mail::new(()).with_to(Url::parse(url).unwrap())
    }

    #[test]
    fn test_url_string_condition_exact_href() {
        let condition = UrlStringCondition::new("ipc://host/jobs");
        assert!(condition.matches(&mail_to("ipc://host/jobs")));
        assert!(!condition.matches(&mail_to("ipc://host/jobs/1")));
        assert!(!condition.matches(&Mail::new(())));
    }

    #[test]
    fn test_url_regex_condition() {
        let condition =
            UrlRegexCondition::try_from(RoutePattern::regex(r"^ipc://host/jobs/\d+$").unwrap())
                .unwrap();
        assert!(condition.matches(&mail_to("ipc://host/jobs/7")));
        assert!(!condition.matches(&mail_to("ipc://host/jobs/x")));
        assert!(!condition.matches(&Mail::new(())));
    }

    #[test]
    fn test_wrong_pattern_kind_fails_fast() {
        let err = UrlStringCondition::try_from(RoutePattern::regex("x").unwrap()).unwrap_err();
        assert!(matches!(
            err,
            RouteError::WrongPatternKind {
                expected: PatternKind::Literal,
                found: PatternKind::Regex
            }
        ));

        let err = UrlRegexCondition::try_from(RoutePattern::literal("x")).unwrap_err();
        assert!(matches!(err, RouteError::WrongPatternKind { .. }));
    }

    #[test]
    fn test_and_group() {
        let group = ConditionGroup::new(ConditionOperator::And)
            .with(UrlRegexCondition::new(Regex::new("^ipc://").unwrap()))
            .with(|mail: &Mail<()>| mail.kind.as_deref() == Some("request"));

        assert!(group.matches(&mail_to("ipc://a/b").with_kind("request")));
        assert!(!group.matches(&mail_to("ipc://a/b")));
        assert!(!group.matches(&mail_to("http://a/b").with_kind("request")));
    }

    #[test]
    fn test_or_group_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let group = ConditionGroup::new(ConditionOperator::Or)
            .with(UrlStringCondition::new("ipc://a/b"))
            .with(move |_: &Mail<()>| {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            });

        assert!(group.matches(&mail_to("ipc://a/b")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(!group.matches(&mail_to("ipc://a/c")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_groups() {
        let input = Mail::new(());
        assert!(ConditionGroup::<Mail<()>>::new(ConditionOperator::And).matches(&input));
        assert!(!ConditionGroup::<Mail<()>>::new(ConditionOperator::Or).matches(&input));
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!("and".parse::<ConditionOperator>().unwrap(), ConditionOperator::And);
        assert_eq!("OR".parse::<ConditionOperator>().unwrap(), ConditionOperator::Or);
        assert!(matches!(
            "xor".parse::<ConditionOperator>(),
            Err(RouteError::InvalidOperator(_))
        ));
    }
}
