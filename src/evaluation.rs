use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::datafile::{Traffic, VariableSchema, VariableValue, Variation};

/// Why an [`Evaluation`] produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationReason {
    /// Feature (or the requested variable) does not exist in the datafile.
    NotFound,
    /// Feature has no variations.
    NoVariations,
    /// Feature is disabled for the context, so there is no variation or variable value.
    Disabled,
    /// A required feature is disabled or resolved to a different variation.
    Required,
    /// Feature belongs to a mutually exclusive group and the context falls outside its slots.
    OutOfRange,
    /// A force entry of the feature matched.
    Forced,
    /// Host-provided initial feature, used until the datafile is ready.
    Initial,
    /// Host-provided sticky feature.
    Sticky,
    /// Resolved directly by the matched traffic rule.
    Rule,
    /// Resolved through allocation or a mutually exclusive slot.
    Allocated,
    /// Variable fell back to its schema default.
    Defaulted,
    /// Resolved by a traffic rule's `enabled` override or a variable override.
    Override,
    /// Nothing matched.
    Error,
}

impl EvaluationReason {
    /// Name as used in the datafile ecosystem, e.g. `"notFound"`.
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationReason::NotFound => "notFound",
            EvaluationReason::NoVariations => "noVariations",
            EvaluationReason::Disabled => "disabled",
            EvaluationReason::Required => "required",
            EvaluationReason::OutOfRange => "outOfRange",
            EvaluationReason::Forced => "forced",
            EvaluationReason::Initial => "initial",
            EvaluationReason::Sticky => "sticky",
            EvaluationReason::Rule => "rule",
            EvaluationReason::Allocated => "allocated",
            EvaluationReason::Defaulted => "defaulted",
            EvaluationReason::Override => "override",
            EvaluationReason::Error => "error",
        }
    }
}

impl std::fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-provided result for a feature that bypasses rule logic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideFeature {
    /// Flag result.
    pub enabled: bool,
    /// Answers variation queries when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
    /// Answers queries for the variables present here. Others fall through to the datafile.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, VariableValue>,
}

/// Sticky features always win over the datafile.
pub type StickyFeatures = HashMap<String, OverrideFeature>;

/// Initial features are used only until the datafile is ready.
pub type InitialFeatures = HashMap<String, OverrideFeature>;

/// Result of evaluating a flag, variation, or variable.
///
/// `reason` is always set. Other fields are populated depending on how far evaluation went.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// Key of the evaluated feature.
    pub feature_key: String,
    /// How the result was produced.
    pub reason: EvaluationReason,

    /// String hashed into `bucket_value`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_key: Option<String>,
    /// Bucket in `0..100_000`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_value: Option<u32>,
    /// Key of the traffic rule that produced the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_key: Option<String>,
    /// The traffic rule that produced the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic: Option<Traffic>,
    /// Index of the force entry that produced the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_index: Option<usize>,

    /// Flag result, when the evaluation decided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Resolved variation, when it is defined in the datafile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<Variation>,
    /// Value of the resolved variation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_value: Option<String>,

    /// Key of the evaluated variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_key: Option<String>,
    /// Resolved variable value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_value: Option<VariableValue>,
    /// Schema of the evaluated variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_schema: Option<VariableSchema>,

    /// Sticky entry that answered the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sticky: Option<OverrideFeature>,
    /// Initial entry that answered the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<OverrideFeature>,
}

impl Evaluation {
    /// A bare evaluation with only `feature_key` and `reason` set.
    pub fn new(feature_key: impl Into<String>, reason: EvaluationReason) -> Evaluation {
        Evaluation {
            feature_key: feature_key.into(),
            reason,
            bucket_key: None,
            bucket_value: None,
            rule_key: None,
            traffic: None,
            force_index: None,
            enabled: None,
            variation: None,
            variation_value: None,
            variable_key: None,
            variable_value: None,
            variable_schema: None,
            sticky: None,
            initial: None,
        }
    }

    /// Whether the feature is enabled. Absent enablement counts as disabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::{Evaluation, EvaluationReason};

    #[test]
    fn reason_names_match_serde() {
        for reason in [
            EvaluationReason::NotFound,
            EvaluationReason::NoVariations,
            EvaluationReason::OutOfRange,
            EvaluationReason::Defaulted,
        ] {
            assert_eq!(
                serde_json::to_value(reason).unwrap(),
                serde_json::Value::String(reason.to_string())
            );
        }
    }

    #[test]
    fn serializes_only_present_fields() {
        let evaluation = Evaluation {
            enabled: Some(false),
            bucket_value: Some(12),
            ..Evaluation::new("checkout", EvaluationReason::OutOfRange)
        };
        assert_eq!(
            serde_json::to_value(&evaluation).unwrap(),
            serde_json::json!({
                "featureKey": "checkout",
                "reason": "outOfRange",
                "bucketValue": 12,
                "enabled": false
            })
        );
        assert!(!evaluation.is_enabled());
    }
}
