//! The `PackRelease` custom resource
//!
//! A `PackRelease` declares which pack should be released where, and how
//! failures are remediated. Its status carries the snapshots of the current
//! and previous releases, the conditions written by the action reconcilers,
//! and the failure counters remediation policy is based on.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::api::{Api, Patch, PatchParams};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{KubeError, Result};
use crate::observe::ReleaseInfo;

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "packsync";

/// Timeout applied when the object does not declare one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Condition type written by install and upgrade
pub const RELEASED_CONDITION: &str = "Released";
/// Condition type written by the test action
pub const TEST_SUCCESS_CONDITION: &str = "TestSuccess";
/// Condition type written by rollback and uninstall
pub const REMEDIATED_CONDITION: &str = "Remediated";

/// Desired state of a release
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "packsync.io",
    version = "v1alpha1",
    kind = "PackRelease",
    namespaced,
    status = "PackReleaseStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PackReleaseSpec {
    /// Release name in storage; derived from the object when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Namespace the release is deployed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Namespace release history is stored in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_namespace: Option<String>,

    /// Upper bound for each action, e.g. "5m"
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<TestSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall: Option<UninstallSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallSpec {
    #[serde(default)]
    pub disable_hooks: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<InstallRemediation>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeSpec {
    #[serde(default)]
    pub disable_hooks: bool,
    /// Revisions to keep in storage (0 keeps all)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<UpgradeRemediation>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub ignore_failures: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSpec {
    #[serde(default)]
    pub disable_hooks: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UninstallSpec {
    #[serde(default)]
    pub disable_hooks: bool,
    #[serde(default)]
    pub keep_history: bool,
}

/// Remediation of failed installs
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallRemediation {
    /// Retries before giving up; negative means unlimited
    #[serde(default)]
    pub retries: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_test_failures: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediate_last_failure: Option<bool>,
}

/// Remediation of failed upgrades
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRemediation {
    /// Retries before giving up; negative means unlimited
    #[serde(default)]
    pub retries: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_test_failures: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediate_last_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RemediationStrategy>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RemediationStrategy {
    #[default]
    Rollback,
    Uninstall,
}

/// Last install or upgrade attempted for the object
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AttemptedAction {
    Install,
    Upgrade,
}

/// Observed state of a release
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackReleaseStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Snapshot of the release this object currently manages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<ReleaseInfo>,

    /// Snapshot of the release `current` replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<ReleaseInfo>,

    #[serde(default)]
    pub failures: i64,

    #[serde(default)]
    pub install_failures: i64,

    #[serde(default)]
    pub upgrade_failures: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_action: Option<AttemptedAction>,
}

impl PackReleaseStatus {
    /// Forget `current` and `previous`
    pub fn reset_history(&mut self) {
        self.current = None;
        self.previous = None;
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace a condition
    ///
    /// The transition time only moves when the condition's status changes.
    pub fn set_condition(
        &mut self,
        type_: &str,
        status: bool,
        reason: &str,
        message: &str,
        observed_generation: Option<i64>,
    ) {
        let status = if status { "True" } else { "False" };
        let now = Time(Utc::now());

        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status.to_string();
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                existing.observed_generation = observed_generation;
            }
            None => self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                observed_generation,
                last_transition_time: now,
            }),
        }
    }
}

impl PackRelease {
    /// Name of the release in storage
    ///
    /// Falls back to `<target-namespace>-<name>` when a target namespace is
    /// set, and to the object name otherwise.
    pub fn release_name(&self) -> String {
        if let Some(name) = &self.spec.release_name {
            return name.clone();
        }
        match &self.spec.target_namespace {
            Some(ns) => format!("{}-{}", ns, self.name_any()),
            None => self.name_any(),
        }
    }

    /// Namespace the release targets
    pub fn release_namespace(&self) -> String {
        self.spec
            .target_namespace
            .clone()
            .or_else(|| self.namespace())
            .unwrap_or_default()
    }

    /// Namespace release history lives in
    pub fn storage_namespace(&self) -> String {
        self.spec
            .storage_namespace
            .clone()
            .or_else(|| self.namespace())
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        self.spec.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn install(&self) -> InstallSpec {
        self.spec.install.clone().unwrap_or_default()
    }

    pub fn upgrade(&self) -> UpgradeSpec {
        self.spec.upgrade.clone().unwrap_or_default()
    }

    pub fn test(&self) -> TestSpec {
        self.spec.test.clone().unwrap_or_default()
    }

    pub fn rollback(&self) -> RollbackSpec {
        self.spec.rollback.clone().unwrap_or_default()
    }

    pub fn uninstall(&self) -> UninstallSpec {
        self.spec.uninstall.clone().unwrap_or_default()
    }

    /// Snapshot of the release currently managed by this object
    pub fn current(&self) -> Option<&ReleaseInfo> {
        self.status.as_ref().and_then(|s| s.current.as_ref())
    }

    pub fn previous(&self) -> Option<&ReleaseInfo> {
        self.status.as_ref().and_then(|s| s.previous.as_ref())
    }

    /// Status, created empty if missing
    pub fn status_mut(&mut self) -> &mut PackReleaseStatus {
        self.status.get_or_insert_with(PackReleaseStatus::default)
    }

    /// Remediation policy that applies to the last attempted action
    pub fn active_remediation(&self) -> ActiveRemediation {
        let last = self.status.as_ref().and_then(|s| s.last_attempted_action);
        let upgrade = match last {
            Some(AttemptedAction::Upgrade) => true,
            Some(AttemptedAction::Install) => false,
            None => self.previous().is_some(),
        };

        if upgrade {
            ActiveRemediation::Upgrade(self.upgrade().remediation.unwrap_or_default())
        } else {
            ActiveRemediation::Install(self.install().remediation.unwrap_or_default())
        }
    }
}

/// Remediation policy in effect for the object
#[derive(Clone, Debug, PartialEq)]
pub enum ActiveRemediation {
    Install(InstallRemediation),
    Upgrade(UpgradeRemediation),
}

impl ActiveRemediation {
    pub fn retries(&self) -> i64 {
        match self {
            Self::Install(r) => r.retries,
            Self::Upgrade(r) => r.retries,
        }
    }

    /// Whether test failures are ignored, `default` when unset
    pub fn must_ignore_test_failures(&self, default: bool) -> bool {
        let ignore = match self {
            Self::Install(r) => r.ignore_test_failures,
            Self::Upgrade(r) => r.ignore_test_failures,
        };
        ignore.unwrap_or(default)
    }

    /// Whether the last failure is remediated once retries run out
    ///
    /// Defaults to true when any retries are configured.
    pub fn must_remediate_last_failure(&self) -> bool {
        let remediate = match self {
            Self::Install(r) => r.remediate_last_failure,
            Self::Upgrade(r) => r.remediate_last_failure,
        };
        remediate.unwrap_or(self.retries() > 0)
    }

    /// Strategy for remediating upgrades; installs are always uninstalled
    pub fn strategy(&self) -> RemediationStrategy {
        match self {
            Self::Install(_) => RemediationStrategy::Uninstall,
            Self::Upgrade(r) => r.strategy.unwrap_or_default(),
        }
    }

    pub fn failure_count(&self, status: &PackReleaseStatus) -> i64 {
        match self {
            Self::Install(_) => status.install_failures,
            Self::Upgrade(_) => status.upgrade_failures,
        }
    }

    /// Whether the failure counter went past the configured retries
    pub fn retries_exhausted(&self, status: &PackReleaseStatus) -> bool {
        let retries = self.retries();
        retries >= 0 && self.failure_count(status) > retries
    }

    pub fn increment_failure_count(&self, status: &mut PackReleaseStatus) {
        match self {
            Self::Install(_) => status.install_failures += 1,
            Self::Upgrade(_) => status.upgrade_failures += 1,
        }
    }
}

/// Write the object's status sub-resource with a merge patch
pub async fn patch_status(client: kube::Client, obj: &PackRelease) -> Result<PackRelease> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| KubeError::InvalidConfig("PackRelease has no namespace".to_string()))?;
    let api: Api<PackRelease> = Api::namespaced(client, &namespace);
    let status_patch = serde_json::json!({ "status": obj.status });

    let patched = api
        .patch_status(
            &obj.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

    Ok(patched)
}
