//! Upgrade action

use async_trait::async_trait;

use crate::actions::UpgradeOptions;
use crate::error::Result;
use crate::release::StoredRelease;

use super::Request;
use super::action::{ActionContext, ActionKind, ReleaseAction, action_timeout};

/// Upgrades the release to the request's pack and values
pub struct UpgradeAction {
    ctx: ActionContext,
}

impl UpgradeAction {
    pub fn new(ctx: ActionContext) -> Self {
        Self { ctx }
    }

    fn options(req: &Request) -> UpgradeOptions {
        let obj = &req.object;
        let spec = obj.upgrade();
        let mut options = UpgradeOptions::new(obj.release_name(), obj.release_namespace())
            .with_storage_namespace(obj.storage_namespace())
            .with_timeout(action_timeout(req));
        if spec.disable_hooks {
            options = options.without_hooks();
        }
        if let Some(max) = spec.max_history {
            options = options.with_max_history(max);
        }
        options
    }
}

#[async_trait]
impl ReleaseAction for UpgradeAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Upgrade
    }

    fn context(&self) -> &ActionContext {
        &self.ctx
    }

    async fn run(&self, req: &Request) -> Result<StoredRelease> {
        self.ctx
            .manager
            .upgrade(&req.pack, req.values.clone(), &Self::options(req))
            .await
    }
}
