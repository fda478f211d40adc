//! Choosing and running the next action
//!
//! The [`Dispatcher`] classifies the release, resets the object's release
//! history when the classification calls for it, and runs at most one action
//! per pass. Callers requeue until [`NextAction::Done`] or
//! [`NextAction::Stalled`].

use std::fmt;

use crate::error::{KubeError, Result};
use crate::object::{PackRelease, RemediationStrategy};

use super::Request;
use super::action::{ActionContext, ActionReconciler};
use super::install::InstallAction;
use super::rollback::RollbackAction;
use super::state::{ReleaseState, ReleaseStatus, determine_release_state};
use super::test::TestAction;
use super::uninstall::UninstallAction;
use super::upgrade::UpgradeAction;

/// What a reconciliation pass decided to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Install,
    Upgrade,
    Test,
    Rollback,
    Uninstall,
    /// Another operation holds the release
    Wait { reason: String },
    /// Release matches the object
    Done,
    /// Retries are exhausted; needs a change to the object
    Stalled { reason: String },
    /// Release state could not be determined
    Abort { reason: String },
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextAction::Install => write!(f, "install"),
            NextAction::Upgrade => write!(f, "upgrade"),
            NextAction::Test => write!(f, "test"),
            NextAction::Rollback => write!(f, "rollback"),
            NextAction::Uninstall => write!(f, "uninstall"),
            NextAction::Wait { reason } => write!(f, "wait ({})", reason),
            NextAction::Done => write!(f, "done"),
            NextAction::Stalled { reason } => write!(f, "stalled ({})", reason),
            NextAction::Abort { reason } => write!(f, "abort ({})", reason),
        }
    }
}

pub struct Dispatcher {
    ctx: ActionContext,
}

impl Dispatcher {
    pub fn new(ctx: ActionContext) -> Self {
        Self { ctx }
    }

    /// Pick the action for a classification result
    pub fn next_action(state: &Result<ReleaseState>, obj: &PackRelease) -> NextAction {
        let state = match state {
            Ok(state) => state,
            Err(e) => {
                return NextAction::Abort {
                    reason: e.to_string(),
                };
            }
        };

        let status = obj.status.clone().unwrap_or_default();
        let remediation = obj.active_remediation();

        match state.status {
            ReleaseStatus::Unknown => NextAction::Abort {
                reason: state.reason.clone(),
            },
            ReleaseStatus::Locked => NextAction::Wait {
                reason: state.reason.clone(),
            },
            ReleaseStatus::InSync => NextAction::Done,
            ReleaseStatus::Untested => NextAction::Test,
            ReleaseStatus::Absent => {
                let install = obj.install().remediation.unwrap_or_default();
                if install.retries >= 0 && status.install_failures > install.retries {
                    return NextAction::Stalled {
                        reason: "install retries exhausted".to_string(),
                    };
                }
                NextAction::Install
            }
            ReleaseStatus::Orphaned | ReleaseStatus::OutOfSync => {
                if remediation.retries_exhausted(&status) {
                    return NextAction::Stalled {
                        reason: "upgrade retries exhausted".to_string(),
                    };
                }
                NextAction::Upgrade
            }
            ReleaseStatus::Failed => {
                if remediation.retries_exhausted(&status)
                    && !remediation.must_remediate_last_failure()
                {
                    return NextAction::Stalled {
                        reason: "retries exhausted for failed release".to_string(),
                    };
                }
                match (remediation.strategy(), obj.previous()) {
                    (RemediationStrategy::Rollback, Some(_)) => NextAction::Rollback,
                    _ => NextAction::Uninstall,
                }
            }
        }
    }

    /// Run one reconciliation pass
    ///
    /// Errors come from the action that ran; the classification outcome is
    /// returned through [`NextAction`].
    pub async fn reconcile(&self, req: &mut Request) -> Result<NextAction> {
        let state = determine_release_state(
            self.ctx.manager.storage().as_ref(),
            req,
            self.ctx.events.as_ref(),
        )
        .await;

        if let Ok(state) = &state {
            tracing::debug!(
                release = %req.object.release_name(),
                status = %state.status,
                reason = %state.reason,
                "determined release state"
            );
            if state.must_reset_history() {
                req.object.status_mut().reset_history();
            }
        }

        let next = Self::next_action(&state, &req.object);
        let reconciler: Box<dyn ActionReconciler> = match &next {
            NextAction::Install => Box::new(InstallAction::new(self.ctx.clone())),
            NextAction::Upgrade => Box::new(UpgradeAction::new(self.ctx.clone())),
            NextAction::Test => Box::new(TestAction::new(self.ctx.clone())),
            NextAction::Rollback => Box::new(RollbackAction::new(self.ctx.clone())),
            NextAction::Uninstall => Box::new(UninstallAction::new(self.ctx.clone())),
            NextAction::Abort { .. } => {
                return match state {
                    Err(e) => Err(e),
                    Ok(_) => Err(KubeError::UnknownReleaseStatus(next.to_string())),
                };
            }
            NextAction::Wait { .. } | NextAction::Done | NextAction::Stalled { .. } => {
                return Ok(next);
            }
        };

        tracing::info!(release = %req.object.release_name(), action = %next, "running release action");
        reconciler.reconcile(req).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{
        AttemptedAction, InstallRemediation, InstallSpec, PackReleaseSpec, PackReleaseStatus,
        UpgradeRemediation, UpgradeSpec,
    };

    fn object(spec: PackReleaseSpec, status: PackReleaseStatus) -> PackRelease {
        let mut obj = PackRelease::new("web", spec);
        obj.metadata.namespace = Some("apps".into());
        obj.status = Some(status);
        obj
    }

    fn state(status: ReleaseStatus) -> Result<ReleaseState> {
        Ok(ReleaseState::new(status, "reason"))
    }

    #[test]
    fn test_simple_mappings() {
        let obj = object(PackReleaseSpec::default(), PackReleaseStatus::default());
        assert_eq!(Dispatcher::next_action(&state(ReleaseStatus::InSync), &obj), NextAction::Done);
        assert_eq!(Dispatcher::next_action(&state(ReleaseStatus::Untested), &obj), NextAction::Test);
        assert_eq!(Dispatcher::next_action(&state(ReleaseStatus::Absent), &obj), NextAction::Install);
        assert_eq!(Dispatcher::next_action(&state(ReleaseStatus::OutOfSync), &obj), NextAction::Upgrade);
        assert_eq!(
            Dispatcher::next_action(&state(ReleaseStatus::Locked), &obj),
            NextAction::Wait {
                reason: "reason".into()
            }
        );
    }

    #[test]
    fn test_error_aborts() {
        let obj = object(PackReleaseSpec::default(), PackReleaseStatus::default());
        let next = Dispatcher::next_action(&Err(KubeError::Storage("down".into())), &obj);
        insta::assert_snapshot!(next.to_string(), @"abort (storage error: down)");
    }

    #[test]
    fn test_install_retries_exhausted() {
        let spec = PackReleaseSpec {
            install: Some(InstallSpec {
                remediation: Some(InstallRemediation {
                    retries: 1,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let status = PackReleaseStatus {
            install_failures: 2,
            last_attempted_action: Some(AttemptedAction::Install),
            ..Default::default()
        };
        let next = Dispatcher::next_action(&state(ReleaseStatus::Absent), &object(spec, status));
        assert!(matches!(next, NextAction::Stalled { .. }));
    }

    #[test]
    fn test_failed_install_is_uninstalled() {
        let status = PackReleaseStatus {
            last_attempted_action: Some(AttemptedAction::Install),
            ..Default::default()
        };
        let obj = object(PackReleaseSpec::default(), status);
        assert_eq!(Dispatcher::next_action(&state(ReleaseStatus::Failed), &obj), NextAction::Uninstall);
    }

    #[test]
    fn test_failed_upgrade_without_previous_is_uninstalled() {
        let status = PackReleaseStatus {
            last_attempted_action: Some(AttemptedAction::Upgrade),
            ..Default::default()
        };
        let spec = PackReleaseSpec {
            upgrade: Some(UpgradeSpec {
                remediation: Some(UpgradeRemediation {
                    retries: 3,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let obj = object(spec, status);
        assert_eq!(Dispatcher::next_action(&state(ReleaseStatus::Failed), &obj), NextAction::Uninstall);
    }

    #[test]
    fn test_failed_upgrade_stalls_without_last_remediation() {
        let status = PackReleaseStatus {
            upgrade_failures: 1,
            last_attempted_action: Some(AttemptedAction::Upgrade),
            ..Default::default()
        };
        let obj = object(PackReleaseSpec::default(), status);
        assert!(matches!(
            Dispatcher::next_action(&state(ReleaseStatus::Failed), &obj),
            NextAction::Stalled { .. }
        ));
    }
}
