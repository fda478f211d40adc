//! Verification of stored releases against recorded snapshots and desired state

use packsync_core::{Digest, PackMetadata, Values};
use thiserror::Error;

use crate::observe::{ObservedRelease, ReleaseInfo};
use crate::release::StoredRelease;

/// Why a stored release does not match what was expected of it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("no release found")]
    ReleaseNotFound,

    /// The recorded digest could not be parsed
    #[error("release digest verification error")]
    ReleaseDigest,

    /// Storage no longer holds the release the snapshot was taken from
    #[error("release not observed to be made for object")]
    ReleaseNotObserved,

    #[error("release chart changed")]
    ChartChanged,

    #[error("release config digest verification error")]
    ConfigDigest,

    /// The release could not be encoded for hashing
    #[error("failed to encode release observation: {0}")]
    Encode(String),
}

impl From<packsync_core::CoreError> for VerifyError {
    fn from(e: packsync_core::CoreError) -> Self {
        VerifyError::Encode(e.to_string())
    }
}

/// Check that `rls` is exactly the release the snapshot `info` was taken from
pub fn verify_release_object(info: &ReleaseInfo, rls: &StoredRelease) -> Result<(), VerifyError> {
    let digest = Digest::parse(&info.digest).map_err(|_| VerifyError::ReleaseDigest)?;
    let obs = ObservedRelease::observe(rls)?;
    if !digest.verifies(&obs)? {
        return Err(VerifyError::ReleaseNotObserved);
    }
    Ok(())
}

/// Check that a deployed release still matches the desired pack and values
///
/// The values digest is compared with the snapshot's config digest, or with
/// the stored values when no snapshot is given.
pub fn verify_release(
    rls: Option<&StoredRelease>,
    info: Option<&ReleaseInfo>,
    metadata: &PackMetadata,
    values: &Values,
) -> Result<(), VerifyError> {
    let rls = rls.ok_or(VerifyError::ReleaseNotFound)?;

    if let Some(info) = info
        && !info.targets(&rls.name, &rls.namespace, rls.version)
    {
        return Err(VerifyError::ReleaseNotObserved);
    }

    if !rls.pack.same_pack(metadata) {
        return Err(VerifyError::ChartChanged);
    }

    let expected = match info {
        Some(info) => info.config_digest.clone(),
        None => rls.values.digest()?,
    };
    if values.digest()? != expected {
        return Err(VerifyError::ConfigDigest);
    }

    Ok(())
}
