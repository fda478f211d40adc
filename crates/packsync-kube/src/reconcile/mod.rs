//! Release reconciliation
//!
//! A pass classifies the release in storage against the declared
//! [`PackRelease`](crate::object::PackRelease) ([`state`]), picks the next
//! action ([`dispatch`]) and runs it through the shared action contract
//! ([`action`]).

pub mod action;
pub mod dispatch;
pub mod install;
pub mod rollback;
pub mod state;
pub mod uninstall;
pub mod upgrade;

pub use action::{ActionContext, ActionKind, ActionReconciler, ReleaseAction};
pub use dispatch::{Dispatcher, NextAction};
pub use install::InstallAction;
pub use rollback::RollbackAction;
pub use state::{ReleaseState, ReleaseStatus, determine_release_state};
pub use test::TestAction;
pub use uninstall::UninstallAction;
pub use upgrade::UpgradeAction;

use packsync_core::{RenderedPack, Values};

use crate::object::PackRelease;

/// Input of one reconciliation pass
#[derive(Debug, Clone)]
pub struct Request {
    /// The declared object; its status is updated in place
    pub object: PackRelease,
    /// Pack to release, already rendered
    pub pack: RenderedPack,
    /// Values the pack was rendered with
    pub values: Values,
}

impl Request {
    pub fn new(object: PackRelease, pack: RenderedPack, values: Values) -> Self {
        Self {
            object,
            pack,
            values,
        }
    }
}
