//! Action options for install, upgrade, rollback, uninstall and test operations

use chrono::Duration;
use std::collections::BTreeMap;

use crate::release::DEFAULT_OPERATION_TIMEOUT;

/// Options for install operation
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Namespace release history is stored in
    pub storage_namespace: String,

    /// Upper bound for the hooks and cluster calls of the action, taken together
    pub timeout: Option<Duration>,

    /// Skip hooks
    pub disable_hooks: bool,

    /// Custom labels to add to the release
    pub labels: BTreeMap<String, String>,

    /// Description for this release
    pub description: Option<String>,
}

impl InstallOptions {
    /// Create default install options with name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            name: name.into(),
            storage_namespace: namespace.clone(),
            namespace,
            ..Default::default()
        }
    }

    /// Keep release history in another namespace
    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.disable_hooks = true;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Options for upgrade operation
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Namespace release history is stored in
    pub storage_namespace: String,

    /// Upper bound for the hooks and cluster calls of the action, taken together
    pub timeout: Option<Duration>,

    /// Skip hooks
    pub disable_hooks: bool,

    /// Maximum history to keep (0 or unset keeps everything)
    pub max_history: Option<u32>,

    /// Custom labels to add
    pub labels: BTreeMap<String, String>,

    /// Description for this revision
    pub description: Option<String>,
}

impl UpgradeOptions {
    /// Create default upgrade options
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            name: name.into(),
            storage_namespace: namespace.clone(),
            namespace,
            ..Default::default()
        }
    }

    /// Keep release history in another namespace
    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.disable_hooks = true;
        self
    }

    /// Prune revisions beyond `max`
    pub fn with_max_history(mut self, max: u32) -> Self {
        self.max_history = Some(max);
        self
    }
}

/// Options for rollback operation
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Namespace release history is stored in
    pub storage_namespace: String,

    /// Revision to roll back to (0 = previous revision)
    pub revision: u32,

    /// Upper bound for the hooks and cluster calls of the action, taken together
    pub timeout: Option<Duration>,

    /// Skip hooks
    pub disable_hooks: bool,
}

impl RollbackOptions {
    /// Create default rollback options (previous revision)
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            name: name.into(),
            storage_namespace: namespace.clone(),
            namespace,
            ..Default::default()
        }
    }

    /// Keep release history in another namespace
    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    /// Roll back to a specific revision
    pub fn to_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.disable_hooks = true;
        self
    }
}

/// Options for uninstall operation
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Namespace release history is stored in
    pub storage_namespace: String,

    /// Upper bound for the hooks and cluster calls of the action, taken together
    pub timeout: Option<Duration>,

    /// Skip hooks
    pub disable_hooks: bool,

    /// Keep release history (the last revision stays, marked uninstalled)
    pub keep_history: bool,
}

impl UninstallOptions {
    /// Create default uninstall options
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            name: name.into(),
            storage_namespace: namespace.clone(),
            namespace,
            ..Default::default()
        }
    }

    /// Keep release history in another namespace
    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    /// Keep release history
    pub fn keep_history(mut self) -> Self {
        self.keep_history = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.disable_hooks = true;
        self
    }
}

/// Options for running the test hooks of a release
#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Namespace release history is stored in
    pub storage_namespace: String,

    /// Upper bound for each test hook without its own timeout
    pub timeout: Option<Duration>,
}

impl TestOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            name: name.into(),
            storage_namespace: namespace.clone(),
            namespace,
            ..Default::default()
        }
    }

    /// Keep release history in another namespace
    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Resolve an optional action timeout against the default
pub(crate) fn effective_timeout(timeout: Option<Duration>) -> Duration {
    timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_options_builder() {
        let opts = InstallOptions::new("myapp", "default")
            .with_timeout(Duration::seconds(30))
            .without_hooks()
            .with_label("team", "web");

        assert_eq!(opts.name, "myapp");
        assert_eq!(opts.storage_namespace, "default");
        assert_eq!(opts.timeout, Some(Duration::seconds(30)));
        assert!(opts.disable_hooks);
        assert_eq!(opts.labels.get("team").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_rollback_defaults_to_previous() {
        let opts = RollbackOptions::new("myapp", "default");
        assert_eq!(opts.revision, 0);
        assert_eq!(opts.to_revision(3).revision, 3);
    }

    #[test]
    fn test_effective_timeout() {
        assert_eq!(effective_timeout(None), Duration::minutes(5));
        assert_eq!(effective_timeout(Some(Duration::seconds(1))), Duration::seconds(1));
    }
}
