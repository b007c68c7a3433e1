use std::collections::HashMap;

use crate::{
    datafile::{Attribute, DatafileContent, Feature, TryParse},
    segments::Segment,
};

/// Immutable, indexed snapshot of a [`DatafileContent`].
///
/// A `Datafile` is never patched in place. Refreshing builds a completely new snapshot that
/// replaces the old one as a whole.
#[derive(Debug)]
pub struct Datafile {
    schema_version: String,
    revision: String,
    attributes: HashMap<String, Attribute>,
    segments: HashMap<String, Segment>,
    features: HashMap<String, Feature>,
}

impl Datafile {
    /// Index `content` by key. Entries that failed to parse are logged and skipped.
    pub fn new(content: DatafileContent) -> Datafile {
        let revision = content.revision;

        let segments = content
            .segments
            .into_iter()
            .filter_map(|segment| parsed_or_warn(segment, "segment", &revision))
            .map(|segment| (segment.key.clone(), segment))
            .collect();

        let features = content
            .features
            .into_iter()
            .filter_map(|feature| parsed_or_warn(feature, "feature", &revision))
            .map(|feature| (feature.key.clone(), feature))
            .collect();

        let attributes = content
            .attributes
            .into_iter()
            .filter_map(|attribute| parsed_or_warn(attribute, "attribute", &revision))
            .map(|attribute| (attribute.key.clone(), attribute))
            .collect();

        Datafile {
            schema_version: content.schema_version,
            revision,
            attributes,
            segments,
            features,
        }
    }

    /// A snapshot with no attributes, segments or features.
    pub fn empty() -> Datafile {
        Datafile::new(DatafileContent::empty())
    }

    /// Schema version of the datafile.
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Revision of the datafile.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Find an attribute declaration by key.
    pub fn get_attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    /// Find a segment by key.
    pub fn get_segment(&self, key: &str) -> Option<&Segment> {
        self.segments.get(key)
    }

    /// Find a feature by key.
    pub fn get_feature(&self, key: &str) -> Option<&Feature> {
        self.features.get(key)
    }

    /// Attributes declared with `capture: true`.
    pub fn captured_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values().filter(|attribute| attribute.capture)
    }

    /// Keys of all features that parsed successfully.
    pub fn feature_keys(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }
}

impl From<DatafileContent> for Datafile {
    fn from(value: DatafileContent) -> Self {
        Datafile::new(value)
    }
}

fn parsed_or_warn<T>(value: TryParse<T>, kind: &str, revision: &str) -> Option<T> {
    match value {
        TryParse::Parsed(value) => Some(value),
        TryParse::ParseFailed(json) => {
            let key = json.get("key").and_then(|key| key.as_str()).unwrap_or("<unknown>");
            log::warn!(target: "featurevisor",
                       kind,
                       key,
                       revision;
                       "skipping malformed datafile entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Datafile;

    #[test]
    fn lookups() {
        let datafile = Datafile::new(
            serde_json::from_str(
                r#"{
                  "schemaVersion": "1",
                  "revision": "7",
                  "attributes": [
                    {"key": "userId", "type": "string", "capture": true},
                    {"key": "country", "type": "string"},
                    {"key": "location", "type": "geoPoint", "capture": true}
                  ],
                  "segments": [{"key": "everyone", "conditions": "*"}],
                  "features": [
                    {"key": "checkout", "bucketBy": "userId", "traffic": []},
                    {"key": "broken", "bucketBy": null}
                  ]
                }"#,
            )
            .unwrap(),
        );

        assert_eq!(datafile.schema_version(), "1");
        assert_eq!(datafile.revision(), "7");
        assert!(datafile.get_attribute("country").is_some());
        assert!(datafile.get_attribute("missing").is_none());
        assert!(datafile.get_attribute("location").is_none());
        assert!(datafile.get_segment("everyone").is_some());
        assert!(datafile.get_feature("checkout").is_some());
        assert!(datafile.get_feature("broken").is_none());
        assert_eq!(
            datafile
                .captured_attributes()
                .map(|a| a.key.as_str())
                .collect::<Vec<_>>(),
            vec!["userId"]
        );
        assert_eq!(datafile.feature_keys().collect::<Vec<_>>(), vec!["checkout"]);
    }

    #[test]
    fn empty() {
        let datafile = Datafile::empty();
        assert_eq!(datafile.revision(), "unknown");
        assert!(datafile.get_feature("anything").is_none());
    }
}
