//! Named segments and group-segment expressions over them.
use serde::{Deserialize, Serialize};

use crate::{conditions::Condition, Context, Datafile};

/// Segment key that matches every context.
pub const WILDCARD_SEGMENT: &str = "*";

/// A named, reusable condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Segment {
    pub key: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
    pub conditions: Condition,
}

impl Segment {
    /// Returns `true` if `context` satisfies the segment conditions.
    pub fn matches(&self, context: &Context) -> bool {
        self.conditions.matches(context)
    }
}

/// A boolean expression over segment references.
///
/// Like [`Condition`], it may appear in a datafile either natively or JSON-encoded inside a string.
/// A string that does not look like encoded JSON is a segment key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GroupSegmentRepr", into = "GroupSegmentRepr")]
pub enum GroupSegment {
    /// Segment key, or [`WILDCARD_SEGMENT`].
    Plain(String),
    /// Implicit AND over a JSON array.
    Multiple(Vec<GroupSegment>),
    /// Matches when every sub-expression matches. Empty list matches.
    And(Vec<GroupSegment>),
    /// Matches when any sub-expression matches. Empty list does not match.
    Or(Vec<GroupSegment>),
    /// Matches unless every sub-expression matches.
    Not(Vec<GroupSegment>),
}

impl GroupSegment {
    /// Returns `true` if `context` satisfies the expression. Unknown segment keys never match.
    pub fn matches(&self, context: &Context, datafile: &Datafile) -> bool {
        match self {
            GroupSegment::Plain(key) if key == WILDCARD_SEGMENT => true,
            GroupSegment::Plain(key) => match datafile.get_segment(key) {
                Some(segment) => segment.matches(context),
                None => {
                    log::debug!(target: "featurevisor", segment_key = key.as_str(); "segment not found");
                    false
                }
            },
            GroupSegment::Multiple(segments) | GroupSegment::And(segments) => segments
                .iter()
                .all(|segment| segment.matches(context, datafile)),
            GroupSegment::Or(segments) => segments
                .iter()
                .any(|segment| segment.matches(context, datafile)),
            // Same NAND semantics as `Condition::Not`.
            GroupSegment::Not(segments) => !segments
                .iter()
                .all(|segment| segment.matches(context, datafile)),
        }
    }
}

impl From<&str> for GroupSegment {
    fn from(value: &str) -> Self {
        GroupSegment::Plain(value.to_owned())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GroupSegmentRepr {
    And { and: Vec<GroupSegment> },
    Or { or: Vec<GroupSegment> },
    Not { not: Vec<GroupSegment> },
    Multiple(Vec<GroupSegment>),
    Plain(String),
}

impl TryFrom<GroupSegmentRepr> for GroupSegment {
    type Error = serde_json::Error;

    fn try_from(value: GroupSegmentRepr) -> Result<Self, Self::Error> {
        Ok(match value {
            GroupSegmentRepr::And { and } => GroupSegment::And(and),
            GroupSegmentRepr::Or { or } => GroupSegment::Or(or),
            GroupSegmentRepr::Not { not } => GroupSegment::Not(not),
            GroupSegmentRepr::Multiple(segments) => GroupSegment::Multiple(segments),
            GroupSegmentRepr::Plain(s) => {
                let trimmed = s.trim_start();
                if trimmed.starts_with('[') || trimmed.starts_with('{') {
                    serde_json::from_str(&s)?
                } else {
                    GroupSegment::Plain(s)
                }
            }
        })
    }
}

impl From<GroupSegment> for GroupSegmentRepr {
    fn from(value: GroupSegment) -> Self {
        match value {
            GroupSegment::Plain(key) => GroupSegmentRepr::Plain(key),
            GroupSegment::Multiple(segments) => GroupSegmentRepr::Multiple(segments),
            GroupSegment::And(and) => GroupSegmentRepr::And { and },
            GroupSegment::Or(or) => GroupSegmentRepr::Or { or },
            GroupSegment::Not(not) => GroupSegmentRepr::Not { not },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::GroupSegment;
    use crate::{Context, Datafile, DatafileContent};

    fn datafile() -> Datafile {
        let content: DatafileContent = serde_json::from_str(
            r#"{
              "schemaVersion": "1",
              "revision": "1",
              "attributes": [],
              "segments": [
                {"key": "netherlands", "conditions": "[{\"attribute\":\"country\",\"operator\":\"equals\",\"value\":\"nl\"}]"},
                {"key": "germany", "conditions": [{"attribute": "country", "operator": "equals", "value": "de"}]},
                {"key": "mobile", "conditions": {"or": [
                  {"attribute": "deviceType", "operator": "equals", "value": "iphone"},
                  {"attribute": "deviceType", "operator": "equals", "value": "android"}
                ]}}
              ],
              "features": []
            }"#,
        )
        .unwrap();
        Datafile::new(content)
    }

    fn context(pairs: &[(&str, &str)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), (*v).into()))
            .collect()
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(GroupSegment::from("*").matches(&HashMap::new(), &datafile()));
    }

    #[test]
    fn plain_segment_lookup() {
        let datafile = datafile();
        let nl = context(&[("country", "nl")]);
        assert!(GroupSegment::from("netherlands").matches(&nl, &datafile));
        assert!(!GroupSegment::from("germany").matches(&nl, &datafile));
        assert!(!GroupSegment::from("unknown").matches(&nl, &datafile));
    }

    #[test]
    fn combinators() {
        let datafile = datafile();
        let ctx = context(&[("country", "nl"), ("deviceType", "android")]);

        let expr = |json: &str| -> GroupSegment { serde_json::from_str(json).unwrap() };

        assert!(expr(r#"["netherlands", "mobile"]"#).matches(&ctx, &datafile));
        assert!(!expr(r#"{"and": ["netherlands", "germany"]}"#).matches(&ctx, &datafile));
        assert!(expr(r#"{"or": ["germany", "mobile"]}"#).matches(&ctx, &datafile));
        assert!(!expr(r#"{"or": []}"#).matches(&ctx, &datafile));
        assert!(expr(r#"{"and": []}"#).matches(&ctx, &datafile));
        assert!(expr(r#"{"not": ["germany"]}"#).matches(&ctx, &datafile));
        assert!(!expr(r#"{"not": ["netherlands"]}"#).matches(&ctx, &datafile));
        assert!(expr(r#"{"not": ["netherlands", "germany"]}"#).matches(&ctx, &datafile));
    }

    #[test]
    fn decode_encoded_string() {
        let native: GroupSegment =
            serde_json::from_str(r#"{"and": ["mobile", {"not": ["germany"]}]}"#).unwrap();
        let encoded: GroupSegment =
            serde_json::from_str(r#""{\"and\":[\"mobile\",{\"not\":[\"germany\"]}]}""#).unwrap();
        assert_eq!(native, encoded);

        let list: GroupSegment = serde_json::from_str(r#""[\"netherlands\"]""#).unwrap();
        assert_eq!(
            list,
            GroupSegment::Multiple(vec![GroupSegment::Plain("netherlands".to_owned())])
        );
    }

    #[test]
    fn encode_round_trip() {
        let expr = GroupSegment::Or(vec![
            "netherlands".into(),
            GroupSegment::Not(vec!["germany".into()]),
        ]);
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"or": ["netherlands", {"not": ["germany"]}]})
        );
        assert_eq!(serde_json::from_value::<GroupSegment>(json).unwrap(), expr);
    }
}
