//! Wire schema of the datafile: the compiled ruleset snapshot consumed by the SDK.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{conditions::Condition, segments::GroupSegment, segments::Segment, Context, Datafile};

/// Datafile as produced by the external build step.
///
/// Attributes, segments and features are wrapped in [`TryParse`] so that one malformed entry does
/// not prevent the rest of the datafile from being used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct DatafileContent {
    pub schema_version: String,
    pub revision: String,
    #[serde(default)]
    pub attributes: Vec<TryParse<Attribute>>,
    #[serde(default)]
    pub segments: Vec<TryParse<Segment>>,
    #[serde(default)]
    pub features: Vec<TryParse<Feature>>,
}

impl DatafileContent {
    /// An empty datafile, installed while the real one is still being fetched.
    pub fn empty() -> DatafileContent {
        DatafileContent {
            schema_version: "1".to_owned(),
            revision: "unknown".to_owned(),
            attributes: Vec::new(),
            segments: Vec::new(),
            features: Vec::new(),
        }
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<T> From<T> for TryParse<T> {
    fn from(value: T) -> Self {
        TryParse::Parsed(value)
    }
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Attribute declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    /// Attribute key, as used in contexts and conditions.
    pub key: String,
    #[serde(rename = "type")]
    /// Declared type of the attribute.
    pub ty: AttributeType,
    /// Whether the attribute is captured into activation events.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub capture: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum AttributeType {
    Boolean,
    String,
    Integer,
    Double,
    Date,
    Semver,
    Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Feature {
    pub key: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables_schema: Vec<VariableSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<Variation>,
    pub bucket_by: BucketBy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<Required>,
    /// Ordered; the first matching rule wins.
    #[serde(default)]
    pub traffic: Vec<Traffic>,
    /// Ordered; the first matching entry wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub force: Vec<Force>,
    /// Slots of a mutually exclusive group this feature belongs to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<Range>,
}

impl Feature {
    /// Find variation by its value.
    pub fn get_variation(&self, value: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.value == value)
    }

    /// Find schema of a variable.
    pub fn get_variable_schema(&self, variable_key: &str) -> Option<&VariableSchema> {
        self.variables_schema.iter().find(|v| v.key == variable_key)
    }
}

/// Which context attributes form the bucket key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BucketBy {
    /// A single attribute.
    Single(String),
    /// Every listed attribute present in the context.
    And(Vec<String>),
    /// The first listed attribute present in the context.
    Or {
        /// Attributes tried in order; the first present one is used.
        or: Vec<String>,
    },
}

/// Dependency on another feature being enabled, optionally with a specific variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum Required {
    Key(String),
    WithVariation {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variation: Option<String>,
    },
}

impl Required {
    /// Key of the required feature.
    pub fn key(&self) -> &str {
        match self {
            Required::Key(key) | Required::WithVariation { key, .. } => key,
        }
    }

    /// Variation the required feature must resolve to, if any.
    pub fn variation(&self) -> Option<&str> {
        match self {
            Required::Key(_) => None,
            Required::WithVariation { variation, .. } => variation.as_deref(),
        }
    }
}

/// A traffic rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traffic {
    /// Key of the rule, reported as `ruleKey` in evaluations.
    pub key: String,
    /// Segments a context has to match for the rule to apply.
    pub segments: GroupSegment,
    /// Share of matching contexts the feature is enabled for, in `0..=100_000`.
    pub percentage: u32,
    /// Overrides enablement for every matching context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Overrides variation for every matching context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
    /// Overrides variable values for every matching context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, VariableValue>,
    #[serde(default)]
    /// Variation ranges of the rule, ascending.
    pub allocation: Vec<Allocation>,
}

/// A percentage sub-range mapped to a variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Allocation {
    pub variation: String,
    pub range: Range,
}

/// Half-open `[start, end)` interval of bucket values. Encoded as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
#[allow(missing_docs)]
pub struct Range {
    pub start: u32,
    pub end: u32,
}

impl Range {
    pub(crate) fn contains(&self, v: u32) -> bool {
        self.start <= v && v < self.end
    }
}

impl From<[u32; 2]> for Range {
    fn from([start, end]: [u32; 2]) -> Self {
        Range { start, end }
    }
}

impl From<Range> for [u32; 2] {
    fn from(value: Range) -> Self {
        [value.start, value.end]
    }
}

/// Unconditional override declared in the datafile and checked before bucketing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Force {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<GroupSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, VariableValue>,
}

impl Force {
    /// Conditions take precedence over segments. An entry with neither never matches.
    pub fn matches(&self, context: &Context, datafile: &Datafile) -> bool {
        guard_matches(&self.conditions, &self.segments, context, datafile)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Variation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: String,
    /// Authoring weight; allocations are already computed from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariationVariable>,
}

impl Variation {
    /// Find a variable redefined by this variation.
    pub fn get_variable(&self, variable_key: &str) -> Option<&VariationVariable> {
        self.variables.iter().find(|v| v.key == variable_key)
    }
}

/// Value a variation assigns to a variable, with optional guarded overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VariationVariable {
    pub key: String,
    pub value: VariableValue,
    /// Evaluated in order; the first match wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<VariableOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VariableOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<GroupSegment>,
    pub value: VariableValue,
}

impl VariableOverride {
    /// Conditions take precedence over segments. An override with neither never matches.
    pub fn matches(&self, context: &Context, datafile: &Datafile) -> bool {
        guard_matches(&self.conditions, &self.segments, context, datafile)
    }
}

fn guard_matches(
    conditions: &Option<Condition>,
    segments: &Option<GroupSegment>,
    context: &Context,
    datafile: &Datafile,
) -> bool {
    match (conditions, segments) {
        (Some(conditions), _) => conditions.matches(context),
        (None, Some(segments)) => segments.matches(context, datafile),
        (None, None) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VariableSchema {
    pub key: String,
    #[serde(rename = "type")]
    pub ty: VariableType,
    pub default_value: VariableValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum VariableType {
    Boolean,
    String,
    Integer,
    Double,
    Array,
    Object,
    /// Stored as a JSON-encoded string.
    Json,
}

/// Value of a variable.
///
/// Untagged, so a value's exact meaning is only known together with its [`VariableType`]: a
/// `double` variable written as `1` decodes to `Integer`, and a `json` variable is a `String`
/// holding encoded JSON. Typed accessors account for that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum VariableValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Array(Vec<String>),
    Object(serde_json::Map<String, serde_json::Value>),
}

impl VariableValue {
    /// Returns the value if this is a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Doubles without a fractional part are accepted as integers.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Double(f) => {
                let i = *f as i64;
                if i as f64 == *f {
                    Some(i)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Integers are widened to doubles.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the values if this is an array.
    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the map if this is an object.
    pub fn as_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            Self::Object(values) => Some(values),
            _ => None,
        }
    }

    /// Decode the value as JSON. Strings are parsed; objects and arrays are converted directly.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::String(s) => serde_json::from_str(s).ok(),
            Self::Object(values) => Some(serde_json::Value::Object(values.clone())),
            Self::Array(values) => serde_json::to_value(values).ok(),
            _ => None,
        }
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}
