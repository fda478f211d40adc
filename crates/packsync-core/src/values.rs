//! Release values
//!
//! Values are the configuration a pack was rendered with. Only their content
//! matters for drift detection, so they are compared through [`Values::digest`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::digest::canonical_digest;
use crate::error::{CoreError, Result};

/// A values document: a mapping, or nothing at all
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Empty values (`{}`)
    pub fn new() -> Self {
        Self(JsonValue::Object(Map::new()))
    }

    /// Parse a YAML values document
    ///
    /// An empty document yields empty values; any top-level type other than a
    /// mapping is rejected.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::checked(serde_yaml::from_str(yaml)?)
    }

    /// Parse a JSON values document
    pub fn from_json(json: &str) -> Result<Self> {
        Self::checked(serde_json::from_str(json)?)
    }

    fn checked(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(_) | JsonValue::Null => Ok(Self(value)),
            other => Err(CoreError::InvalidValues {
                found: json_type(&other).to_string(),
            }),
        }
    }

    /// Look up a value by dotted path, e.g. `image.tag`
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |node, key| node.as_object()?.get(key))
    }

    /// Whether there are no values (`null` or `{}`)
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Null => true,
            JsonValue::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Content digest of these values
    ///
    /// `null` and `{}` share one digest, so a release installed without values
    /// verifies against an empty values object.
    pub fn digest(&self) -> Result<String> {
        if self.is_empty() {
            return canonical_digest(&JsonValue::Object(Map::new()));
        }
        canonical_digest(&self.0)
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "sequence",
        JsonValue::Object(_) => "mapping",
    }
}
