//! Install action

use async_trait::async_trait;

use crate::actions::InstallOptions;
use crate::error::Result;
use crate::release::StoredRelease;

use super::Request;
use super::action::{ActionContext, ActionKind, ReleaseAction, action_timeout};

/// Installs the request's pack as a new release
pub struct InstallAction {
    ctx: ActionContext,
}

impl InstallAction {
    pub fn new(ctx: ActionContext) -> Self {
        Self { ctx }
    }

    fn options(req: &Request) -> InstallOptions {
        let obj = &req.object;
        let mut options = InstallOptions::new(obj.release_name(), obj.release_namespace())
            .with_storage_namespace(obj.storage_namespace())
            .with_timeout(action_timeout(req));
        if obj.install().disable_hooks {
            options = options.without_hooks();
        }
        options
    }
}

#[async_trait]
impl ReleaseAction for InstallAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Install
    }

    fn context(&self) -> &ActionContext {
        &self.ctx
    }

    async fn run(&self, req: &Request) -> Result<StoredRelease> {
        self.ctx
            .manager
            .install(&req.pack, req.values.clone(), &Self::options(req))
            .await
    }
}
