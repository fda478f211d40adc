//! Observations of stored releases
//!
//! An [`ObservedRelease`] is a deterministic projection of a stored revision.
//! Its digest is written to the declared object's status as part of a
//! [`ReleaseInfo`] snapshot, so later passes can tell whether storage still
//! holds exactly what was recorded.

use chrono::{DateTime, Utc};
use packsync_core::{CoreError, canonical_digest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hooks::HookRunPhase;
use crate::release::StoredRelease;

/// Last known execution of a test hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestHookStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed: Option<DateTime<Utc>>,
    pub phase: HookRunPhase,
}

/// Deterministic projection of a stored release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedRelease {
    pub name: String,
    pub namespace: String,
    pub version: u32,
    pub status: String,
    pub chart_name: String,
    pub chart_version: String,
    pub app_version: Option<String>,
    pub config_digest: String,
    pub manifest_digest: String,
    pub first_deployed: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,
    pub deleted: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub test_hooks: BTreeMap<String, TestHookStatus>,
}

impl ObservedRelease {
    /// Observe a stored release
    pub fn observe(rls: &StoredRelease) -> Result<Self, CoreError> {
        let test_hooks = rls
            .test_hooks()
            .filter_map(|hook| {
                let run = hook.last_run.as_ref()?;
                Some((
                    hook.name.clone(),
                    TestHookStatus {
                        last_started: Some(run.started_at),
                        last_completed: run.completed_at,
                        phase: run.phase,
                    },
                ))
            })
            .collect();

        Ok(Self {
            name: rls.name.clone(),
            namespace: rls.namespace.clone(),
            version: rls.version,
            status: rls.state.status_name().to_string(),
            chart_name: rls.pack.name.clone(),
            chart_version: rls.pack.version.to_string(),
            app_version: rls.pack.app_version.clone(),
            config_digest: rls.values.digest()?,
            manifest_digest: packsync_core::sha256_digest(rls.manifest.as_bytes()),
            first_deployed: rls.first_deployed,
            last_deployed: rls.created_at,
            deleted: rls.deleted_at,
            labels: rls.labels.clone(),
            test_hooks,
        })
    }

    /// `sha256:` digest of the canonical JSON encoding
    pub fn digest(&self) -> Result<String, CoreError> {
        canonical_digest(self)
    }
}

/// Snapshot of a release as recorded in the declared object's status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub version: u32,
    pub status: String,
    /// Digest of the [`ObservedRelease`] this snapshot was taken from
    pub digest: String,
    pub config_digest: String,
    pub chart_name: String,
    pub chart_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    pub first_deployed: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    /// Test hook results; `None` until the release has been tested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_hooks: Option<BTreeMap<String, TestHookStatus>>,
}

impl ReleaseInfo {
    /// Snapshot a stored release
    pub fn from_release(rls: &StoredRelease) -> Result<Self, CoreError> {
        let obs = ObservedRelease::observe(rls)?;
        let digest = obs.digest()?;
        let test_hooks = (!obs.test_hooks.is_empty()).then(|| obs.test_hooks.clone());

        Ok(Self {
            name: obs.name,
            namespace: obs.namespace,
            version: obs.version,
            status: obs.status,
            digest,
            config_digest: obs.config_digest,
            chart_name: obs.chart_name,
            chart_version: obs.chart_version,
            app_version: obs.app_version,
            first_deployed: obs.first_deployed,
            last_deployed: obs.last_deployed,
            deleted: obs.deleted,
            test_hooks,
        })
    }

    /// `namespace/name.vN`
    pub fn full_release_name(&self) -> String {
        format!("{}/{}.v{}", self.namespace, self.name, self.version)
    }

    /// Whether this snapshot points at the given revision
    pub fn targets(&self, name: &str, namespace: &str, version: u32) -> bool {
        self.name == name && self.namespace == namespace && self.version == version
    }

    pub fn has_been_tested(&self) -> bool {
        self.test_hooks.is_some()
    }

    /// Whether any recorded test hook ended in `phase`
    pub fn has_test_in_phase(&self, phase: HookRunPhase) -> bool {
        self.test_hooks
            .as_ref()
            .is_some_and(|hooks| hooks.values().any(|h| h.phase == phase))
    }
}
