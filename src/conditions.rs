//! Condition trees and their matching against a [`Context`].
use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use derive_more::From;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{AttributeValue, Context};

/// A boolean expression over context attributes.
///
/// In a datafile, a condition may be written as a native JSON structure or as a JSON-encoded
/// string. Both decode to the same tree. The string `"*"` decodes to a condition that always
/// matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConditionRepr", into = "ConditionRepr")]
pub enum Condition {
    /// A single attribute comparison.
    Plain(PlainCondition),
    /// Implicit AND over a JSON array.
    Multiple(Vec<Condition>),
    /// Matches when every sub-condition matches. Empty list matches.
    And(Vec<Condition>),
    /// Matches when any sub-condition matches. Empty list does not match.
    Or(Vec<Condition>),
    /// Matches unless every sub-condition matches.
    Not(Vec<Condition>),
}

/// `attribute operator value` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PlainCondition {
    pub attribute: String,
    pub operator: Operator,
    pub value: ConditionValue,
}

/// Possible condition operators.
///
/// Every operator is only defined for specific pairs of attribute and condition value types. Any
/// other pairing makes the condition fail.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum Operator {
    // boolean, string, integer, double
    Equals,
    NotEquals,

    // integer, double
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,

    // string
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    /// Regular expression match. Invalid expressions never match.
    Matches,
    /// Negated regular expression match. Invalid expressions never match.
    NotMatches,

    // semver strings
    SemverEquals,
    SemverNotEquals,
    SemverGreaterThan,
    SemverGreaterThanOrEquals,
    SemverLessThan,
    SemverLessThanOrEquals,

    // dates, or strings holding ISO-8601 dates
    Before,
    After,

    // string attribute against a list of strings
    In,
    NotIn,
}

/// Literal value on the right side of a [`PlainCondition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum ConditionValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    StringArray(Vec<String>),
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for ConditionValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl Condition {
    /// Returns `true` if `context` satisfies the condition tree.
    pub fn matches(&self, context: &Context) -> bool {
        match self {
            Condition::Plain(condition) => condition.matches(context),
            Condition::Multiple(conditions) | Condition::And(conditions) => {
                conditions.iter().all(|condition| condition.matches(context))
            }
            Condition::Or(conditions) => conditions.iter().any(|condition| condition.matches(context)),
            // NAND: true unless every sub-condition matches.
            Condition::Not(conditions) => {
                !conditions.iter().all(|condition| condition.matches(context))
            }
        }
    }
}

impl PlainCondition {
    /// Returns `false` if the attribute is missing, the types don't pair up, or the operator is not
    /// applicable.
    pub fn matches(&self, context: &Context) -> bool {
        self.try_match(context.get(&self.attribute))
            .unwrap_or(false)
    }

    /// Try applying the operator, returning `None` if it cannot be applied.
    fn try_match(&self, attribute: Option<&AttributeValue>) -> Option<bool> {
        use AttributeValue as A;
        use ConditionValue as C;

        match (attribute?, &self.value) {
            (A::Boolean(a), C::Boolean(b)) => match self.operator {
                Operator::Equals => Some(a == b),
                Operator::NotEquals => Some(a != b),
                _ => None,
            },
            (A::String(a), C::String(b)) => self.operator.eval_strings(a, b),
            (A::Date(a), C::String(b)) => self.operator.eval_dates(*a, parse_date(b)?),
            (A::Integer(a), C::Integer(b)) => self.operator.eval_ordering(a.cmp(b)),
            (A::Double(a), C::Double(b)) => self.operator.eval_ordering(a.partial_cmp(b)?),
            (A::String(a), C::StringArray(values)) => {
                let is_in = values.iter().any(|v| v == a);
                match self.operator {
                    Operator::In => Some(is_in),
                    Operator::NotIn => Some(!is_in),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl Operator {
    fn eval_strings(self, attribute: &str, value: &str) -> Option<bool> {
        match self {
            Operator::Equals => Some(attribute == value),
            Operator::NotEquals => Some(attribute != value),
            Operator::Contains => Some(attribute.contains(value)),
            Operator::NotContains => Some(!attribute.contains(value)),
            Operator::StartsWith => Some(attribute.starts_with(value)),
            Operator::EndsWith => Some(attribute.ends_with(value)),
            Operator::Matches | Operator::NotMatches => {
                let matches = Regex::new(value).ok()?.is_match(attribute);
                Some(matches == (self == Operator::Matches))
            }
            Operator::SemverEquals
            | Operator::SemverNotEquals
            | Operator::SemverGreaterThan
            | Operator::SemverGreaterThanOrEquals
            | Operator::SemverLessThan
            | Operator::SemverLessThanOrEquals => {
                let ordering = parse_semver(attribute).cmp(&parse_semver(value));
                Some(match self {
                    Operator::SemverEquals => ordering == Ordering::Equal,
                    Operator::SemverNotEquals => ordering != Ordering::Equal,
                    Operator::SemverGreaterThan => ordering == Ordering::Greater,
                    Operator::SemverGreaterThanOrEquals => ordering != Ordering::Less,
                    Operator::SemverLessThan => ordering == Ordering::Less,
                    Operator::SemverLessThanOrEquals => ordering != Ordering::Greater,
                    _ => return None,
                })
            }
            Operator::Before | Operator::After => {
                self.eval_dates(parse_date(attribute)?, parse_date(value)?)
            }
            _ => None,
        }
    }

    fn eval_dates(self, attribute: DateTime<Utc>, value: DateTime<Utc>) -> Option<bool> {
        match self {
            Operator::Before => Some(attribute < value),
            Operator::After => Some(attribute > value),
            _ => None,
        }
    }

    fn eval_ordering(self, ordering: Ordering) -> Option<bool> {
        match self {
            Operator::Equals => Some(ordering == Ordering::Equal),
            Operator::NotEquals => Some(ordering != Ordering::Equal),
            Operator::GreaterThan => Some(ordering == Ordering::Greater),
            Operator::GreaterThanOrEquals => Some(ordering != Ordering::Less),
            Operator::LessThan => Some(ordering == Ordering::Less),
            Operator::LessThanOrEquals => Some(ordering != Ordering::Greater),
            _ => None,
        }
    }
}

/// Lenient `major.minor.patch` parsing.
///
/// Missing components and components that are not numbers are treated as `0`. Pre-release and
/// build suffixes are ignored, so versions compare by their numeric triple only.
pub(crate) fn parse_semver(s: &str) -> Version {
    let core = s.trim().split(['-', '+']).next().unwrap_or_default();
    let mut components = core
        .split('.')
        .map(|component| component.parse::<u64>().unwrap_or(0));
    let major = components.next().unwrap_or(0);
    let minor = components.next().unwrap_or(0);
    let patch = components.next().unwrap_or(0);
    Version::new(major, minor, patch)
}

/// Parse an ISO-8601 date-time. Accepts RFC 3339, date-time without offset (UTC assumed), and plain
/// dates (midnight UTC).
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(date.and_utc());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Wire representation of [`Condition`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ConditionRepr {
    Plain(PlainCondition),
    And { and: Vec<Condition> },
    Or { or: Vec<Condition> },
    Not { not: Vec<Condition> },
    Multiple(Vec<Condition>),
    Encoded(String),
}

impl TryFrom<ConditionRepr> for Condition {
    type Error = serde_json::Error;

    fn try_from(value: ConditionRepr) -> Result<Self, Self::Error> {
        Ok(match value {
            ConditionRepr::Plain(condition) => Condition::Plain(condition),
            ConditionRepr::And { and } => Condition::And(and),
            ConditionRepr::Or { or } => Condition::Or(or),
            ConditionRepr::Not { not } => Condition::Not(not),
            ConditionRepr::Multiple(conditions) => Condition::Multiple(conditions),
            ConditionRepr::Encoded(s) if s.trim() == "*" => Condition::Multiple(Vec::new()),
            ConditionRepr::Encoded(s) => serde_json::from_str(&s)?,
        })
    }
}

impl From<Condition> for ConditionRepr {
    fn from(value: Condition) -> Self {
        match value {
            Condition::Plain(condition) => ConditionRepr::Plain(condition),
            Condition::Multiple(conditions) => ConditionRepr::Multiple(conditions),
            Condition::And(and) => ConditionRepr::And { and },
            Condition::Or(or) => ConditionRepr::Or { or },
            Condition::Not(not) => ConditionRepr::Not { not },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};
    use semver::Version;

    use super::{parse_semver, Condition, ConditionValue, Operator, PlainCondition};
    use crate::{AttributeValue, Context};

    fn plain(attribute: &str, operator: Operator, value: impl Into<ConditionValue>) -> Condition {
        Condition::Plain(PlainCondition {
            attribute: attribute.to_owned(),
            operator,
            value: value.into(),
        })
    }

    fn context(attribute: &str, value: impl Into<AttributeValue>) -> Context {
        HashMap::from([(attribute.to_owned(), value.into())])
    }

    #[test]
    fn equals_by_type() {
        assert!(plain("country", Operator::Equals, "nl").matches(&context("country", "nl")));
        assert!(!plain("country", Operator::Equals, "nl").matches(&context("country", "de")));
        assert!(plain("country", Operator::NotEquals, "nl").matches(&context("country", "de")));
        assert!(plain("beta", Operator::Equals, true).matches(&context("beta", true)));
        assert!(plain("age", Operator::Equals, 18).matches(&context("age", 18)));
        assert!(plain("score", Operator::Equals, 1.5).matches(&context("score", 1.5)));
    }

    #[test]
    fn no_coercion_between_types() {
        assert!(!plain("age", Operator::Equals, 18).matches(&context("age", 18.0)));
        assert!(!plain("age", Operator::Equals, "18").matches(&context("age", 18)));
        assert!(!plain("beta", Operator::Equals, "true").matches(&context("beta", true)));
    }

    #[test]
    fn missing_attribute_never_matches() {
        assert!(!plain("country", Operator::Equals, "nl").matches(&HashMap::new()));
        assert!(!plain("country", Operator::NotEquals, "nl").matches(&HashMap::new()));
        assert!(!plain("country", Operator::NotIn, vec!["nl".to_owned()]).matches(&HashMap::new()));
    }

    #[test]
    fn invalid_operator_for_types() {
        assert!(!plain("beta", Operator::GreaterThan, true).matches(&context("beta", true)));
        assert!(!plain("name", Operator::GreaterThan, "a").matches(&context("name", "b")));
        assert!(!plain("age", Operator::Contains, 1).matches(&context("age", 11)));
    }

    #[test]
    fn numeric_comparisons() {
        let ctx = context("age", 20);
        assert!(plain("age", Operator::GreaterThan, 18).matches(&ctx));
        assert!(plain("age", Operator::GreaterThanOrEquals, 20).matches(&ctx));
        assert!(!plain("age", Operator::LessThan, 20).matches(&ctx));
        assert!(plain("age", Operator::LessThanOrEquals, 20).matches(&ctx));

        let ctx = context("score", 0.5);
        assert!(plain("score", Operator::LessThan, 0.75).matches(&ctx));
        assert!(!plain("score", Operator::GreaterThan, 0.75).matches(&ctx));
        assert!(!plain("score", Operator::Equals, f64::NAN).matches(&context("score", f64::NAN)));
    }

    #[test]
    fn string_operators() {
        let ctx = context("name", "featurevisor");
        assert!(plain("name", Operator::Contains, "visor").matches(&ctx));
        assert!(!plain("name", Operator::NotContains, "visor").matches(&ctx));
        assert!(plain("name", Operator::StartsWith, "feature").matches(&ctx));
        assert!(plain("name", Operator::EndsWith, "visor").matches(&ctx));
        assert!(!plain("name", Operator::EndsWith, "feature").matches(&ctx));
    }

    #[test]
    fn regex_operators() {
        let ctx = context("email", "test@example.com");
        assert!(plain("email", Operator::Matches, "^test.*").matches(&ctx));
        assert!(!plain("email", Operator::NotMatches, "^test.*").matches(&ctx));
        assert!(plain("email", Operator::NotMatches, "^example").matches(&ctx));
        assert!(!plain("email", Operator::Matches, "(unclosed").matches(&ctx));
        assert!(!plain("email", Operator::NotMatches, "(unclosed").matches(&ctx));
    }

    #[test]
    fn in_operators() {
        let values = vec!["nl".to_owned(), "de".to_owned()];
        assert!(plain("country", Operator::In, values.clone()).matches(&context("country", "nl")));
        assert!(!plain("country", Operator::In, values.clone()).matches(&context("country", "ch")));
        assert!(plain("country", Operator::NotIn, values.clone()).matches(&context("country", "ch")));
        assert!(!plain("country", Operator::NotIn, values).matches(&context("country", "de")));
    }

    #[test]
    fn semver_parsing() {
        assert_eq!(parse_semver("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(parse_semver("2"), Version::new(2, 0, 0));
        assert_eq!(parse_semver("2.1"), Version::new(2, 1, 0));
        assert_eq!(parse_semver("invalid"), Version::new(0, 0, 0));
        assert_eq!(parse_semver("1.x.3"), Version::new(1, 0, 3));
        assert_eq!(parse_semver("1.2.3-beta.1"), Version::new(1, 2, 3));
        assert!(parse_semver("2.0.0") > parse_semver("1.9.9"));
        assert!(parse_semver("1.10.0") > parse_semver("1.2.0"));
    }

    #[test]
    fn semver_operators() {
        let ctx = context("version", "1.13.0");
        assert!(plain("version", Operator::SemverGreaterThan, "1.5.0").matches(&ctx));
        assert!(plain("version", Operator::SemverGreaterThanOrEquals, "1.13").matches(&ctx));
        assert!(plain("version", Operator::SemverEquals, "1.13").matches(&ctx));
        assert!(!plain("version", Operator::SemverNotEquals, "1.13.0").matches(&ctx));
        assert!(plain("version", Operator::SemverLessThan, "2.0.0").matches(&ctx));
        assert!(!plain("version", Operator::SemverLessThanOrEquals, "1.2.0").matches(&ctx));
    }

    #[test]
    fn date_operators() {
        let string_ctx = context("signedUpAt", "2023-06-01T00:00:00Z");
        assert!(plain("signedUpAt", Operator::Before, "2024-01-01T00:00:00Z").matches(&string_ctx));
        assert!(plain("signedUpAt", Operator::After, "2023-01-01").matches(&string_ctx));
        assert!(!plain("signedUpAt", Operator::After, "not a date").matches(&string_ctx));
        assert!(!plain("signedUpAt", Operator::Before, "2024-01-01")
            .matches(&context("signedUpAt", "yesterday")));

        let date_ctx = context(
            "signedUpAt",
            Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
        );
        assert!(plain("signedUpAt", Operator::Before, "2024-01-01T00:00:00.000Z").matches(&date_ctx));
        assert!(!plain("signedUpAt", Operator::After, "2024-01-01T00:00:00Z").matches(&date_ctx));
        assert!(!plain("signedUpAt", Operator::Before, "garbage").matches(&date_ctx));
    }

    #[test]
    fn combinators() {
        let ctx = context("country", "nl");
        let nl = plain("country", Operator::Equals, "nl");
        let de = plain("country", Operator::Equals, "de");

        assert!(Condition::And(vec![]).matches(&ctx));
        assert!(Condition::Multiple(vec![]).matches(&ctx));
        assert!(!Condition::Or(vec![]).matches(&ctx));

        assert_eq!(Condition::And(vec![nl.clone()]).matches(&ctx), nl.matches(&ctx));
        assert_eq!(Condition::And(vec![de.clone()]).matches(&ctx), de.matches(&ctx));

        assert!(!Condition::And(vec![nl.clone(), de.clone()]).matches(&ctx));
        assert!(Condition::Or(vec![nl.clone(), de.clone()]).matches(&ctx));
        assert!(!Condition::Multiple(vec![nl.clone(), de.clone()]).matches(&ctx));
    }

    #[test]
    fn not_is_true_unless_all_match() {
        let ctx = context("country", "nl");
        let nl = plain("country", Operator::Equals, "nl");
        let de = plain("country", Operator::Equals, "de");

        assert!(!Condition::Not(vec![nl.clone()]).matches(&ctx));
        assert!(Condition::Not(vec![de.clone()]).matches(&ctx));
        // One of two matching is still "not all".
        assert!(Condition::Not(vec![nl, de]).matches(&ctx));
        assert!(!Condition::Not(vec![]).matches(&ctx));
    }

    #[test]
    fn decode_native_and_encoded() {
        let native: Condition = serde_json::from_str(
            r#"{"and": [
                {"attribute": "country", "operator": "equals", "value": "nl"},
                {"or": [{"attribute": "age", "operator": "greaterThan", "value": 18}]},
                {"not": [{"attribute": "beta", "operator": "equals", "value": true}]}
            ]}"#,
        )
        .unwrap();
        let encoded: Condition = serde_json::from_value(serde_json::Value::String(
            serde_json::to_string(&native).unwrap(),
        ))
        .unwrap();
        assert_eq!(native, encoded);

        let Condition::And(children) = &native else {
            panic!("expected And, got {native:?}");
        };
        assert_eq!(children.len(), 3);
        assert!(matches!(children[1], Condition::Or(_)));
        assert!(matches!(children[2], Condition::Not(_)));
    }

    #[test]
    fn decode_list_and_wildcard() {
        let list: Condition = serde_json::from_str(
            r#"[{"attribute": "country", "operator": "in", "value": ["nl", "be"]}]"#,
        )
        .unwrap();
        assert!(matches!(&list, Condition::Multiple(c) if c.len() == 1));
        assert!(list.matches(&context("country", "be")));

        let everyone: Condition = serde_json::from_str(r#""*""#).unwrap();
        assert!(everyone.matches(&HashMap::new()));
    }

    #[test]
    fn encode_round_trip() {
        let condition = Condition::Or(vec![
            plain("country", Operator::Equals, "nl"),
            Condition::Multiple(vec![plain("age", Operator::LessThan, 30)]),
        ]);
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"or": [
                {"attribute": "country", "operator": "equals", "value": "nl"},
                [{"attribute": "age", "operator": "lessThan", "value": 30}]
            ]})
        );
        let decoded: Condition = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, condition);
    }
}
