//! Uninstall remediation

use async_trait::async_trait;
use chrono::Utc;

use crate::actions::UninstallOptions;
use crate::error::Result;
use crate::object::PackReleaseStatus;
use crate::release::{LifecycleState, StoredRelease};

use super::Request;
use super::action::{ActionContext, ActionKind, ReleaseAction, action_timeout, record_pointers};

/// Removes the release from the cluster, and from storage unless history is kept
pub struct UninstallAction {
    ctx: ActionContext,
}

impl UninstallAction {
    pub fn new(ctx: ActionContext) -> Self {
        Self { ctx }
    }

    fn options(req: &Request) -> UninstallOptions {
        let obj = &req.object;
        let spec = obj.uninstall();
        let mut options = UninstallOptions::new(obj.release_name(), obj.release_namespace())
            .with_storage_namespace(obj.storage_namespace())
            .with_timeout(action_timeout(req));
        if spec.disable_hooks {
            options = options.without_hooks();
        }
        if spec.keep_history {
            options = options.keep_history();
        }
        options
    }
}

#[async_trait]
impl ReleaseAction for UninstallAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Uninstall
    }

    fn context(&self) -> &ActionContext {
        &self.ctx
    }

    async fn run(&self, req: &Request) -> Result<StoredRelease> {
        self.ctx.manager.uninstall(&Self::options(req)).await
    }

    fn record(
        &self,
        status: &mut PackReleaseStatus,
        history: &[StoredRelease],
        outcome: &Result<StoredRelease>,
    ) -> Result<()> {
        if !history.is_empty() {
            return record_pointers(status, history);
        }

        // History deleted along with the release; mark the snapshot instead.
        if outcome.is_ok()
            && let Some(cur) = status.current.as_mut()
        {
            cur.status = LifecycleState::Uninstalled.status_name().to_string();
            cur.deleted = Some(Utc::now());
        }
        Ok(())
    }
}
