//! Content digests
//!
//! Digests are rendered as `sha256:<hex>`. Structured values are hashed over
//! their canonical JSON form (object keys sorted at every level), so the same
//! content always yields the same digest regardless of map insertion order.

use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest as _, Sha256};

use crate::error::{CoreError, Result};

/// Algorithm prefix of every digest produced by this crate
pub const SHA256_PREFIX: &str = "sha256:";

const SHA256_HEX_LEN: usize = 64;

/// Compute the SHA256 digest of raw bytes
pub fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize()))
}

/// Compute the digest of a serializable value over its canonical JSON encoding
pub fn canonical_digest<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonicalize(&json))?;
    Ok(sha256_digest(&bytes))
}

/// Rebuild a JSON value with object keys in sorted order
fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// A parsed `sha256:<hex>` digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Parse a digest string, rejecting unknown algorithms and malformed hex
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |reason: &str| CoreError::InvalidDigest {
            digest: s.to_string(),
            reason: reason.to_string(),
        };

        let hex = s
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| invalid("unsupported or missing algorithm"))?;

        if hex.len() != SHA256_HEX_LEN {
            return Err(invalid("unexpected length"));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("not hex encoded"));
        }

        Ok(Self {
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Check whether this digest matches the content digest of `value`
    pub fn verifies<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool> {
        Ok(canonical_digest(value)? == self.to_string())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", SHA256_PREFIX, self.hex)
    }
}

impl std::str::FromStr for Digest {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
