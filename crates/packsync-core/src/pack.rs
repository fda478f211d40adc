//! Pack metadata and rendered packs
//!
//! Rendering templates is not packsync's job: callers hand over a pack whose
//! templates were already rendered into a multi-document manifest.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pack metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackMetadata {
    /// Pack name (required)
    pub name: String,

    /// Pack version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Application version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl PackMetadata {
    /// Create metadata with a name and version
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: None,
            app_version: None,
            annotations: BTreeMap::new(),
        }
    }

    /// Set the application version
    pub fn with_app_version(mut self, app_version: impl Into<String>) -> Self {
        self.app_version = Some(app_version.into());
        self
    }

    /// Whether `other` names the same pack at the same version
    pub fn same_pack(&self, other: &PackMetadata) -> bool {
        self.name == other.name && self.version == other.version
    }
}

/// A pack whose templates were rendered into a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPack {
    /// Pack metadata
    pub metadata: PackMetadata,

    /// Rendered manifest (YAML documents separated by `---`), hooks included
    pub manifest: String,
}

impl RenderedPack {
    pub fn new(metadata: PackMetadata, manifest: impl Into<String>) -> Self {
        Self {
            metadata,
            manifest: manifest.into(),
        }
    }
}

/// Custom serde for semver::Version
mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
