//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to encode or parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("values must be a mapping, found {found}")]
    InvalidValues { found: String },

    #[error("invalid digest '{digest}': {reason}")]
    InvalidDigest { digest: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
