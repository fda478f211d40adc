//! Stored release revisions and their lifecycle state machine

use chrono::{DateTime, Duration, Utc};
use packsync_core::{PackMetadata, Values};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hooks::{Hook, HookEvent};

/// Default timeout for pending operations (5 minutes)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::minutes(5);

/// One revision of a release as held by the storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    /// Release name
    pub name: String,

    /// Kubernetes namespace the release targets
    pub namespace: String,

    /// Revision number (1-indexed, increments with every mutating action)
    pub version: u32,

    /// Lifecycle state with timing information
    pub state: LifecycleState,

    /// Pack metadata at deploy time
    pub pack: PackMetadata,

    /// Effective values
    pub values: Values,

    /// Rendered manifest (hooks excluded)
    pub manifest: String,

    /// Hooks defined in this release, with their last execution
    #[serde(default)]
    pub hooks: Vec<Hook>,

    /// Custom labels for filtering/querying
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Human-readable description of the action that produced this revision
    #[serde(default)]
    pub description: Option<String>,

    /// When the first revision of this release was deployed
    pub first_deployed: DateTime<Utc>,

    /// Creation timestamp of this revision
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Set once the release has been uninstalled
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StoredRelease {
    /// Create a new release for installation
    pub fn for_install(
        name: String,
        namespace: String,
        pack: PackMetadata,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name,
            namespace,
            version: 1,
            state: LifecycleState::PendingInstall {
                started_at: now,
                timeout: DEFAULT_OPERATION_TIMEOUT,
            },
            pack,
            values,
            manifest,
            hooks: Vec::new(),
            labels: BTreeMap::new(),
            description: Some("Initial install".to_string()),
            first_deployed: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Create the next revision for an upgrade
    pub fn for_upgrade(
        previous: &StoredRelease,
        pack: PackMetadata,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            version: previous.version + 1,
            state: LifecycleState::PendingUpgrade {
                started_at: now,
                timeout: DEFAULT_OPERATION_TIMEOUT,
                previous_version: previous.version,
            },
            pack,
            values,
            manifest,
            hooks: Vec::new(),
            labels: previous.labels.clone(),
            description: Some("Upgrade".to_string()),
            first_deployed: previous.first_deployed,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Create the next revision restoring the content of `target`
    pub fn for_rollback(current: &StoredRelease, target: &StoredRelease) -> Self {
        let now = Utc::now();
        let hooks = target
            .hooks
            .iter()
            .cloned()
            .map(|mut hook| {
                hook.last_run = None;
                hook
            })
            .collect();

        Self {
            name: current.name.clone(),
            namespace: current.namespace.clone(),
            version: current.version + 1,
            state: LifecycleState::PendingRollback {
                started_at: now,
                timeout: DEFAULT_OPERATION_TIMEOUT,
                target_version: target.version,
            },
            pack: target.pack.clone(),
            values: target.values.clone(),
            manifest: target.manifest.clone(),
            hooks,
            labels: current.labels.clone(),
            description: Some(format!("Rollback to {}", target.version)),
            first_deployed: current.first_deployed,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Override the pending timeout recorded in the lifecycle state
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        match &mut self.state {
            LifecycleState::PendingInstall { timeout: t, .. }
            | LifecycleState::PendingUpgrade { timeout: t, .. }
            | LifecycleState::PendingRollback { timeout: t, .. }
            | LifecycleState::PendingUninstall { timeout: t, .. } => *t = timeout,
            _ => {}
        }
        self
    }

    /// Hooks that run for the `test` event
    pub fn test_hooks(&self) -> impl Iterator<Item = &Hook> {
        self.hooks.iter().filter(|h| h.runs_for(HookEvent::Test))
    }

    /// Mark the release as deployed
    pub fn mark_deployed(&mut self) {
        self.state = LifecycleState::Deployed;
        self.updated_at = Utc::now();
    }

    /// Mark the release as failed
    pub fn mark_failed(&mut self, reason: String) {
        let now = Utc::now();
        self.state = LifecycleState::Failed {
            reason,
            failed_at: now,
        };
        self.updated_at = now;
    }

    /// Mark the release as superseded (replaced by a newer version)
    pub fn mark_superseded(&mut self) {
        self.state = LifecycleState::Superseded;
        self.updated_at = Utc::now();
    }

    /// Mark the release as being uninstalled
    pub fn mark_pending_uninstall(&mut self, timeout: Duration) {
        let now = Utc::now();
        self.state = LifecycleState::PendingUninstall {
            started_at: now,
            timeout,
        };
        self.updated_at = now;
    }

    /// Mark the release as uninstalled
    pub fn mark_uninstalled(&mut self) {
        let now = Utc::now();
        self.state = LifecycleState::Uninstalled;
        self.updated_at = now;
        self.deleted_at = Some(now);
    }
}

/// Lifecycle state of a stored release, with timing for pending operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum LifecycleState {
    /// Successfully deployed
    Deployed,

    /// Deployment failed
    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },

    /// Release has been uninstalled
    Uninstalled,

    /// Replaced by a newer revision
    Superseded,

    /// Installation in progress
    PendingInstall {
        started_at: DateTime<Utc>,
        #[serde(with = "duration_serde")]
        timeout: Duration,
    },

    /// Upgrade in progress
    PendingUpgrade {
        started_at: DateTime<Utc>,
        #[serde(with = "duration_serde")]
        timeout: Duration,
        previous_version: u32,
    },

    /// Rollback in progress
    PendingRollback {
        started_at: DateTime<Utc>,
        #[serde(with = "duration_serde")]
        timeout: Duration,
        target_version: u32,
    },

    /// Uninstallation in progress
    PendingUninstall {
        started_at: DateTime<Utc>,
        #[serde(with = "duration_serde")]
        timeout: Duration,
    },

    /// A status written by something other than packsync
    #[serde(other)]
    Unknown,
}

impl LifecycleState {
    /// Check if this is a pending (transitional) state
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall { .. }
                | Self::PendingUpgrade { .. }
                | Self::PendingRollback { .. }
                | Self::PendingUninstall { .. }
        )
    }

    /// Whether a pending operation outlived its timeout
    pub fn is_stale(&self) -> bool {
        match self {
            Self::PendingInstall { started_at, timeout }
            | Self::PendingUpgrade {
                started_at, timeout, ..
            }
            | Self::PendingRollback {
                started_at, timeout, ..
            }
            | Self::PendingUninstall { started_at, timeout } => {
                Utc::now().signed_duration_since(*started_at) > *timeout
            }
            _ => false,
        }
    }

    /// Status name as written to storage
    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Failed { .. } => "failed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::PendingInstall { .. } => "pending-install",
            Self::PendingUpgrade { .. } => "pending-upgrade",
            Self::PendingRollback { .. } => "pending-rollback",
            Self::PendingUninstall { .. } => "pending-uninstall",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status_name())
    }
}

/// Serialization helper for chrono::Duration
pub(crate) mod duration_serde {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.num_milliseconds().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_release() -> StoredRelease {
        StoredRelease::for_install(
            "myapp".to_string(),
            "default".to_string(),
            PackMetadata::new("test", semver::Version::new(1, 0, 0)),
            Values::new(),
            "apiVersion: v1".to_string(),
        )
    }

    #[test]
    fn test_lifecycle_stale_detection() {
        let old_time = Utc::now() - Duration::minutes(10);
        let state = LifecycleState::PendingInstall {
            started_at: old_time,
            timeout: Duration::minutes(5),
        };

        assert!(state.is_stale());
    }

    #[test]
    fn test_lifecycle_not_stale() {
        let state = LifecycleState::PendingInstall {
            started_at: Utc::now(),
            timeout: Duration::minutes(5),
        };

        assert!(!state.is_stale());
        assert!(!LifecycleState::Deployed.is_stale());
    }

    #[test]
    fn test_pending_states() {
        assert!(!LifecycleState::Deployed.is_pending());
        assert!(!LifecycleState::Unknown.is_pending());
        assert!(
            LifecycleState::PendingRollback {
                started_at: Utc::now(),
                timeout: Duration::minutes(5),
                target_version: 1,
            }
            .is_pending()
        );
    }

    #[test]
    fn test_unknown_status_deserializes() {
        let state: LifecycleState = serde_json::from_str(r#"{"status":"frozen"}"#).unwrap();
        assert_eq!(state, LifecycleState::Unknown);
        assert_eq!(state.to_string(), "unknown");
    }

    #[test]
    fn test_state_roundtrip_keeps_tag() {
        let json = serde_json::to_value(LifecycleState::Superseded).unwrap();
        assert_eq!(json["status"], "superseded");
    }

    #[test]
    fn test_upgrade_revision_links_previous() {
        let mut v1 = test_release();
        v1.mark_deployed();
        let v2 = StoredRelease::for_upgrade(
            &v1,
            PackMetadata::new("test", semver::Version::new(1, 1, 0)),
            Values::new(),
            String::new(),
        );

        assert_eq!(v2.version, 2);
        assert_eq!(v2.first_deployed, v1.first_deployed);
        assert!(matches!(
            v2.state,
            LifecycleState::PendingUpgrade { previous_version: 1, .. }
        ));
    }

    #[test]
    fn test_mark_uninstalled_sets_deleted() {
        let mut release = test_release();
        release.mark_uninstalled();
        assert!(release.deleted_at.is_some());
        assert_eq!(release.state, LifecycleState::Uninstalled);
    }
}
