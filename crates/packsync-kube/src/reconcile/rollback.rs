//! Rollback remediation
//!
//! Deploys the content of the object's `previous` release as a new revision.
//! Unlike the other actions, `previous` is left alone afterwards: it still
//! names the revision that was rolled back to.

use async_trait::async_trait;

use crate::actions::RollbackOptions;
use crate::error::Result;
use crate::object::PackReleaseStatus;
use crate::observe::ReleaseInfo;
use crate::release::StoredRelease;

use super::Request;
use super::action::{ActionContext, ActionKind, ReleaseAction, action_timeout, refresh};

pub struct RollbackAction {
    ctx: ActionContext,
}

impl RollbackAction {
    pub fn new(ctx: ActionContext) -> Self {
        Self { ctx }
    }

    fn options(req: &Request) -> RollbackOptions {
        let obj = &req.object;
        let mut options = RollbackOptions::new(obj.release_name(), obj.release_namespace())
            .with_storage_namespace(obj.storage_namespace())
            .with_timeout(action_timeout(req));
        if let Some(previous) = obj.previous() {
            options = options.to_revision(previous.version);
        }
        if obj.rollback().disable_hooks {
            options = options.without_hooks();
        }
        options
    }
}

#[async_trait]
impl ReleaseAction for RollbackAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Rollback
    }

    fn context(&self) -> &ActionContext {
        &self.ctx
    }

    async fn run(&self, req: &Request) -> Result<StoredRelease> {
        self.ctx.manager.rollback(&Self::options(req)).await
    }

    fn record(
        &self,
        status: &mut PackReleaseStatus,
        history: &[StoredRelease],
        _outcome: &Result<StoredRelease>,
    ) -> Result<()> {
        let Some(latest) = history.first() else {
            return Ok(());
        };
        let latest_info = ReleaseInfo::from_release(latest)?;

        status.current = Some(match status.current.take() {
            Some(cur) if cur.targets(&latest.name, &latest.namespace, latest.version) => {
                refresh(&cur, latest_info)
            }
            _ => latest_info,
        });
        Ok(())
    }
}
