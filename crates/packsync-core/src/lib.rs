//! Packsync Core - Core types shared by the packsync release reconciler
//!
//! This crate provides the foundational types used throughout packsync:
//! - `RenderedPack`: A pack (chart bundle) whose templates were already rendered
//! - `Values`: Configuration values with deep merge support and content digests
//! - `Digest`: `sha256:` content digests over canonical JSON

pub mod digest;
pub mod error;
pub mod pack;
pub mod values;

pub use digest::{Digest, canonical_digest, sha256_digest};
pub use error::CoreError;
pub use pack::{PackMetadata, RenderedPack};
pub use values::Values;
