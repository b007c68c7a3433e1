use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing the attributes of the subject being evaluated.
///
/// Keys are attribute keys as declared in the datafile.
///
/// # Examples
/// ```
/// # use featurevisor::{Context, AttributeValue};
/// let context = [
///     ("userId".to_owned(), "user-123".into()),
///     ("age".to_owned(), 30i64.into()),
///     ("isPremium".to_owned(), true.into()),
/// ].into_iter().collect::<Context>();
/// ```
pub type Context = HashMap<String, AttributeValue>;

/// Enum representing possible values of a context attribute.
///
/// Values are never coerced between variants during condition matching: an `Integer` attribute
/// only compares against an integer condition value, a `Double` only against a double, and so on.
///
/// When deserialized from JSON, strings always become [`AttributeValue::String`]. `Date` values are
/// constructed by the host directly; string-typed attributes still support date operators.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A boolean value.
    Boolean(bool),
    /// An integer value.
    Integer(i64),
    /// A floating point value.
    Double(f64),
    /// A string value.
    String(String),
    /// A list of strings.
    StringArray(Vec<String>),
    /// A point in time.
    Date(DateTime<Utc>),
}

impl AttributeValue {
    /// Lossless text representation used when building bucket keys.
    pub(crate) fn to_bucket_string(&self) -> String {
        match self {
            AttributeValue::Boolean(b) => b.to_string(),
            AttributeValue::Integer(i) => i.to_string(),
            AttributeValue::Double(d) => d.to_string(),
            AttributeValue::String(s) => s.clone(),
            AttributeValue::StringArray(values) => values.join(","),
            AttributeValue::Date(date) => date.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Returns the string if this is a string attribute.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::AttributeValue;

    #[test]
    fn bucket_strings() {
        assert_eq!(AttributeValue::from(true).to_bucket_string(), "true");
        assert_eq!(AttributeValue::from(42).to_bucket_string(), "42");
        assert_eq!(AttributeValue::from(1.0).to_bucket_string(), "1");
        assert_eq!(AttributeValue::from(1.5).to_bucket_string(), "1.5");
        assert_eq!(AttributeValue::from("abc").to_bucket_string(), "abc");
        assert_eq!(
            AttributeValue::from(vec!["a".to_owned(), "b".to_owned()]).to_bucket_string(),
            "a,b"
        );
        assert_eq!(
            AttributeValue::from(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
                .to_bucket_string(),
            "2024-01-02T03:04:05.000Z"
        );
    }

    #[test]
    fn deserialize_untagged() {
        let values: Vec<AttributeValue> =
            serde_json::from_str(r#"[true, 3, 3.5, "nl", ["a"]]"#).unwrap();
        assert_eq!(
            values,
            vec![
                AttributeValue::Boolean(true),
                AttributeValue::Integer(3),
                AttributeValue::Double(3.5),
                AttributeValue::String("nl".to_owned()),
                AttributeValue::StringArray(vec!["a".to_owned()]),
            ]
        );
    }
}
