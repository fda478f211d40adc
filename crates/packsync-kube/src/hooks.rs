//! Release hooks: model, manifest parsing and execution
//!
//! Hooks are manifest documents annotated with `packsync.io/hook` (or the
//! Helm-compatible `helm.sh/hook`). They are split out of the rendered
//! manifest at deploy time, run by the [`ClusterExecutor`] around each action,
//! and keep a record of their last execution on the stored release.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{KubeError, Result};
use crate::manager::ClusterExecutor;

/// Event a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    PreDelete,
    PostDelete,
    /// Test hooks (run on demand)
    Test,
}

impl HookEvent {
    fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "pre-install" => Some(HookEvent::PreInstall),
            "post-install" => Some(HookEvent::PostInstall),
            "pre-upgrade" => Some(HookEvent::PreUpgrade),
            "post-upgrade" => Some(HookEvent::PostUpgrade),
            "pre-rollback" => Some(HookEvent::PreRollback),
            "post-rollback" => Some(HookEvent::PostRollback),
            "pre-delete" => Some(HookEvent::PreDelete),
            "post-delete" => Some(HookEvent::PostDelete),
            "test" | "test-success" => Some(HookEvent::Test),
            _ => None,
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookEvent::PreInstall => "pre-install",
            HookEvent::PostInstall => "post-install",
            HookEvent::PreUpgrade => "pre-upgrade",
            HookEvent::PostUpgrade => "post-upgrade",
            HookEvent::PreRollback => "pre-rollback",
            HookEvent::PostRollback => "post-rollback",
            HookEvent::PreDelete => "pre-delete",
            HookEvent::PostDelete => "post-delete",
            HookEvent::Test => "test",
        };
        write!(f, "{}", s)
    }
}

/// Hook definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// Hook name (used to generate unique resource names)
    pub name: String,

    /// Events this hook runs for
    pub events: Vec<HookEvent>,

    /// The resource to create (as YAML)
    pub resource: String,

    /// Weight for ordering (lower = runs first)
    #[serde(default)]
    pub weight: i32,

    /// What to do if the hook fails
    #[serde(default)]
    pub on_failure: HookFailurePolicy,

    /// Timeout for one execution; the action timeout applies when unset
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Record of the last execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<HookExecution>,
}

impl Hook {
    /// Generate a unique resource name for this hook
    ///
    /// Format: {release}-{hook_name}-{event}-v{revision}
    pub fn unique_name(&self, release: &str, event: HookEvent, revision: u32) -> String {
        format!("{}-{}-{}-v{}", release, self.name, event, revision)
    }

    /// Check if this hook should run for a given event
    pub fn runs_for(&self, event: HookEvent) -> bool {
        self.events.contains(&event)
    }

    /// Phase of the last execution, `Unknown` when it never ran
    pub fn last_phase(&self) -> HookRunPhase {
        self.last_run
            .as_ref()
            .map(|run| run.phase)
            .unwrap_or(HookRunPhase::Unknown)
    }
}

/// What to do when a hook fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookFailurePolicy {
    /// Fail the entire operation
    #[default]
    FailOperation,

    /// Log the error but continue
    Continue,

    /// Retry the hook N times before failing
    Retry {
        max_attempts: u32,
        #[serde(default = "default_retry_backoff", with = "humantime_serde")]
        backoff: Duration,
    },
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(5)
}

/// Outcome phase of a hook execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HookRunPhase {
    #[default]
    Unknown,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for HookRunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookRunPhase::Unknown => "Unknown",
            HookRunPhase::Running => "Running",
            HookRunPhase::Succeeded => "Succeeded",
            HookRunPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Last execution of a hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookExecution {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub phase: HookRunPhase,
}

/// Result of executing a hook
#[derive(Debug, Clone)]
pub struct HookResult {
    /// Hook name
    pub name: String,

    /// Event it ran for
    pub event: HookEvent,

    /// Whether it succeeded
    pub success: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Number of attempts
    pub attempts: u32,
}

/// Runs hooks for an event through a [`ClusterExecutor`]
pub struct HookExecutor {
    executor: Arc<dyn ClusterExecutor>,
    namespace: String,
    release: String,
    revision: u32,
    default_timeout: Duration,
    /// Instant no hook may run past, whatever its own timeout
    deadline: Option<Instant>,
    /// Results of executed hooks
    pub results: Vec<HookResult>,
}

impl HookExecutor {
    /// Create an executor for one release revision
    pub fn new(
        executor: Arc<dyn ClusterExecutor>,
        namespace: &str,
        release: &str,
        revision: u32,
        default_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            namespace: namespace.to_string(),
            release: release.to_string(),
            revision,
            default_timeout,
            deadline: None,
            results: Vec::new(),
        }
    }

    /// Cap every hook at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Execute all hooks for an event, ordered by weight
    ///
    /// Returns Err on the first hook that fails under the `fail-operation`
    /// policy (or exhausts its retries). Every executed hook gets its
    /// `last_run` recorded.
    pub async fn execute_event(&mut self, hooks: &mut [Hook], event: HookEvent) -> Result<()> {
        let mut order: Vec<usize> = (0..hooks.len())
            .filter(|&i| hooks[i].runs_for(event))
            .collect();
        order.sort_by_key(|&i| hooks[i].weight);

        for i in order {
            let hook = &mut hooks[i];
            let max_attempts = match hook.on_failure {
                HookFailurePolicy::Retry { max_attempts, .. } => max_attempts.max(1),
                _ => 1,
            };

            let mut attempts = 0;
            let outcome = loop {
                attempts += 1;
                match self.run_once(hook, event).await {
                    Ok(()) => break Ok(()),
                    Err(message) if attempts < max_attempts => {
                        tracing::debug!(hook = %hook.name, %event, attempts, %message, "retrying hook");
                        if let HookFailurePolicy::Retry { backoff, .. } = hook.on_failure {
                            tokio::time::sleep(backoff).await;
                        }
                    }
                    Err(message) => break Err(message),
                }
            };

            match outcome {
                Ok(()) => self.results.push(HookResult {
                    name: hook.name.clone(),
                    event,
                    success: true,
                    error: None,
                    attempts,
                }),
                Err(message) => {
                    self.results.push(HookResult {
                        name: hook.name.clone(),
                        event,
                        success: false,
                        error: Some(message.clone()),
                        attempts,
                    });

                    if hook.on_failure == HookFailurePolicy::Continue {
                        tracing::warn!(hook = %hook.name, %event, %message, "hook failed, continuing");
                        continue;
                    }

                    let message = if attempts > 1 {
                        format!("{} (after {} attempts)", message, attempts)
                    } else {
                        message
                    };
                    return Err(KubeError::HookFailed {
                        hook_name: hook.name.clone(),
                        phase: event.to_string(),
                        message,
                    });
                }
            }
        }

        Ok(())
    }

    /// Run every test hook regardless of failure policy
    ///
    /// Returns the names of the hooks that failed.
    pub async fn execute_tests(&mut self, hooks: &mut [Hook]) -> Vec<String> {
        let mut order: Vec<usize> = (0..hooks.len())
            .filter(|&i| hooks[i].runs_for(HookEvent::Test))
            .collect();
        order.sort_by_key(|&i| hooks[i].weight);

        let mut failed = Vec::new();
        for i in order {
            let hook = &mut hooks[i];
            let result = self.run_once(hook, HookEvent::Test).await;
            if let Err(message) = &result {
                tracing::warn!(hook = %hook.name, %message, "test hook failed");
                failed.push(hook.name.clone());
            }
            self.results.push(HookResult {
                name: hook.name.clone(),
                event: HookEvent::Test,
                success: result.is_ok(),
                error: result.err(),
                attempts: 1,
            });
        }
        failed
    }

    /// One attempt, bounded by the hook (or action) timeout and the deadline
    async fn run_once(&self, hook: &mut Hook, event: HookEvent) -> std::result::Result<(), String> {
        let unique_name = hook.unique_name(&self.release, event, self.revision);
        let mut timeout = hook.timeout.unwrap_or(self.default_timeout);
        let mut until = Instant::now() + timeout;
        if let Some(deadline) = self.deadline
            && deadline < until
        {
            until = deadline;
            timeout = self.default_timeout;
        }
        let started_at = Utc::now();
        hook.last_run = Some(HookExecution {
            started_at,
            completed_at: None,
            phase: HookRunPhase::Running,
        });

        let run = self.executor.run_hook(&self.namespace, &unique_name, hook);
        let result = match tokio::time::timeout_at(until, run).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(KubeError::HookFailed { message, .. })) => Err(message),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(KubeError::Timeout(format!("{:?}", timeout)).to_string()),
        };

        hook.last_run = Some(HookExecution {
            started_at,
            completed_at: Some(Utc::now()),
            phase: if result.is_ok() {
                HookRunPhase::Succeeded
            } else {
                HookRunPhase::Failed
            },
        });
        result
    }

}

/// Split a rendered manifest into hooks and the remaining plain manifest
pub fn split_manifest(manifest: &str) -> (Vec<Hook>, String) {
    let mut hooks = Vec::new();
    let mut plain = Vec::new();

    for doc in manifest.split("\n---") {
        let doc = doc.trim().trim_start_matches("---").trim();
        if doc.is_empty() {
            continue;
        }
        match parse_hook(doc) {
            Some(hook) => hooks.push(hook),
            None => plain.push(doc),
        }
    }

    (hooks, plain.join("\n---\n"))
}

fn parse_hook(doc: &str) -> Option<Hook> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(doc).ok()?;
    let metadata = yaml.get("metadata")?;
    let annotations = metadata.get("annotations")?.as_mapping()?;

    let annotation = |key: &str| {
        annotations
            .get(serde_yaml::Value::String(format!("packsync.io/{}", key)))
            .or_else(|| annotations.get(serde_yaml::Value::String(format!("helm.sh/{}", key))))
            .and_then(|v| v.as_str())
    };

    let events: Vec<HookEvent> = annotation("hook")?
        .split(',')
        .filter_map(HookEvent::parse)
        .collect();

    let name = metadata
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or("unnamed-hook")
        .to_string();

    let weight = annotation("hook-weight")
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);

    let timeout = annotation("hook-timeout")
        .and_then(|s| humantime_serde::re::humantime::parse_duration(s.trim()).ok());

    let on_failure = match annotation("hook-failure-policy") {
        Some("continue") => HookFailurePolicy::Continue,
        _ => HookFailurePolicy::FailOperation,
    };

    Some(Hook {
        name,
        events,
        resource: doc.to_string(),
        weight,
        on_failure,
        timeout,
        last_run: None,
    })
}
