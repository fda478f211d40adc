//! Classification of the release in storage against the declared object

use crate::error::{KubeError, Result};
use crate::events::{Event, EventSink, Severity};
use crate::hooks::HookRunPhase;
use crate::observe::ObservedRelease;
use crate::release::LifecycleState;
use crate::storage::StorageDriver;
use crate::verify::{VerifyError, verify_release, verify_release_object};

use super::Request;

/// Status of a release as determined by comparing storage with the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseStatus {
    /// The status could not be determined
    Unknown,
    /// No release in storage
    Absent,
    /// A release exists in storage but is not managed by the object
    Orphaned,
    /// The release is managed but differs from the desired pack or values
    OutOfSync,
    /// The release has an operation pending
    Locked,
    /// The release is in sync but its tests have not run
    Untested,
    InSync,
    Failed,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReleaseStatus::Unknown => "Unknown",
            ReleaseStatus::Absent => "Absent",
            ReleaseStatus::Orphaned => "Orphaned",
            ReleaseStatus::OutOfSync => "OutOfSync",
            ReleaseStatus::Locked => "Locked",
            ReleaseStatus::Untested => "Untested",
            ReleaseStatus::InSync => "InSync",
            ReleaseStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Status with a human-readable reason (possibly empty)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseState {
    pub status: ReleaseStatus,
    pub reason: String,
}

impl ReleaseState {
    pub fn new(status: ReleaseStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// The state reported when classification fails
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self::new(ReleaseStatus::Unknown, reason)
    }

    /// Whether `current` and `previous` on the object must be discarded
    ///
    /// True when storage was changed in a way that leaves the recorded
    /// snapshots unusable for rollback or diffing.
    pub fn must_reset_history(&self) -> bool {
        matches!(
            self.status,
            ReleaseStatus::Locked | ReleaseStatus::Orphaned | ReleaseStatus::Absent
        )
    }
}

/// Classify the last release in storage against the request
///
/// Never mutates the request. An error means the status is
/// [`ReleaseStatus::Unknown`].
pub async fn determine_release_state(
    storage: &dyn StorageDriver,
    req: &Request,
    events: &dyn EventSink,
) -> Result<ReleaseState> {
    let obj = &req.object;
    let namespace = obj.storage_namespace();
    let name = obj.release_name();

    let rls = match storage.last_release(&namespace, &name).await {
        Ok(rls) => rls,
        Err(e) if e.is_release_not_found() => {
            return Ok(ReleaseState::new(
                ReleaseStatus::Absent,
                "no release in storage for object",
            ));
        }
        Err(e) => return Err(KubeError::LastRelease(Box::new(e))),
    };

    let release_ref = format!("{}/{}", namespace, name);
    let observed = ObservedRelease::observe(&rls)
        .map_err(KubeError::from)
        .and_then(|obs| Ok(serde_json::to_string(&obs)?))
        .unwrap_or_else(|e| e.to_string());
    events.emit(&Event::new(
        Severity::Debug,
        "DetermineReleaseState",
        observed,
        release_ref.clone(),
    ));

    if rls.state.is_pending() {
        if rls.state.is_stale() {
            events.emit(&Event::new(
                Severity::Warning,
                "StalePendingRelease",
                format!(
                    "release with status '{}' outlived its timeout at revision {}",
                    rls.state, rls.version
                ),
                release_ref,
            ));
        }
        return Ok(ReleaseState::new(
            ReleaseStatus::Locked,
            format!("release with status '{}'", rls.state),
        ));
    }

    let Some(cur) = obj.current() else {
        if rls.state == LifecycleState::Uninstalled {
            return Ok(ReleaseState::new(
                ReleaseStatus::Absent,
                "found uninstalled release in storage",
            ));
        }
        return Ok(ReleaseState::new(
            ReleaseStatus::Orphaned,
            "found existing release in storage not managed by object",
        ));
    };

    if let Err(e) = verify_release_object(cur, &rls) {
        return match e {
            VerifyError::ReleaseDigest | VerifyError::ReleaseNotObserved => {
                Ok(ReleaseState::new(ReleaseStatus::Orphaned, e.to_string()))
            }
            other => Err(KubeError::VerifyObject(other)),
        };
    }

    match &rls.state {
        LifecycleState::Failed { .. } => Ok(ReleaseState::new(ReleaseStatus::Failed, "")),
        LifecycleState::Uninstalled | LifecycleState::Superseded => Ok(ReleaseState::new(
            ReleaseStatus::Absent,
            format!("release with status '{}'", rls.state),
        )),
        LifecycleState::Deployed => {
            if let Err(e) = verify_release(Some(&rls), Some(cur), &req.pack.metadata, &req.values) {
                return match e {
                    VerifyError::ChartChanged | VerifyError::ConfigDigest => {
                        Ok(ReleaseState::new(ReleaseStatus::OutOfSync, e.to_string()))
                    }
                    other => Err(other.into()),
                };
            }

            // Tests may also have been run by hand, so the recorded snapshot decides.
            let test = obj.test();
            if test.enable {
                if !cur.has_been_tested() {
                    return Ok(ReleaseState::new(ReleaseStatus::Untested, ""));
                }

                let remediation = obj.active_remediation();
                if !remediation.must_ignore_test_failures(test.ignore_failures)
                    && cur.has_test_in_phase(HookRunPhase::Failed)
                {
                    return Ok(ReleaseState::new(ReleaseStatus::Failed, "has failed test"));
                }
            }

            Ok(ReleaseState::new(ReleaseStatus::InSync, ""))
        }
        other => Err(KubeError::UnknownReleaseStatus(other.to_string())),
    }
}
