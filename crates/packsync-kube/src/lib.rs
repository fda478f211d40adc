//! Packsync Kube - release reconciliation for declared pack releases
//!
//! This crate provides:
//! - **Storage Drivers**: Versioned release history keyed by storage namespace and name
//! - **Release Management**: Install, upgrade, rollback, uninstall and test workflows
//! - **Hooks System**: Weighted hooks with failure policies and per-hook timeouts
//! - **Observation**: Digestible snapshots of stored releases and their verification
//! - **Reconciliation**: Release state classification and the action reconcilers
//! - **Declared Object**: The `PackRelease` custom resource and its status

pub mod actions;
pub mod error;
pub mod events;
pub mod hooks;
pub mod manager;
pub mod object;
pub mod observe;
pub mod reconcile;
pub mod release;
pub mod storage;
pub mod verify;

pub use actions::{InstallOptions, RollbackOptions, TestOptions, UninstallOptions, UpgradeOptions};
pub use error::{KubeError, Result};
pub use events::{Event, EventSink, RecordingEventSink, Severity, TracingEventSink};
pub use hooks::{
    Hook, HookEvent, HookExecution, HookExecutor, HookFailurePolicy, HookResult, HookRunPhase,
};
pub use manager::{ClusterExecutor, MockExecutor, ReleaseManager};
pub use object::{
    ActiveRemediation, PackRelease, PackReleaseSpec, PackReleaseStatus, RemediationStrategy,
};
pub use observe::{ObservedRelease, ReleaseInfo, TestHookStatus};
pub use reconcile::{
    ActionContext, ActionKind, ActionReconciler, Dispatcher, NextAction, ReleaseAction,
    ReleaseState, ReleaseStatus, Request, determine_release_state,
};
pub use release::{LifecycleState, StoredRelease};
pub use storage::{FailingDriver, MemoryDriver, OperationCounts, StorageDriver};
pub use verify::{VerifyError, verify_release, verify_release_object};
