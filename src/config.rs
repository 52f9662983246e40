//! Operator configuration
//!
//! Settings shared by every controller. Built from command line flags and
//! environment variables in `main.rs`.

use std::time::Duration;

/// CSI driver names provisioned by this operator
pub const DEFAULT_CSI_DRIVERS: &[&str] = &[
    "block.csi.storage.billyronks.io",
    "file.csi.storage.billyronks.io",
];

/// Configuration for the reconcilers
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the operator runs in (legacy attachment records live here)
    pub operator_namespace: String,
    /// Skip the legacy attachment subsystem during deletion checks
    pub disable_legacy_attachment_check: bool,
    /// Do not reconcile clusters on hot-plug config map changes
    pub disable_hotplug_watch: bool,
    /// CSI drivers whose volumes block cluster deletion
    pub csi_drivers: Vec<String>,
    /// Requeue interval while a parent or multisite dependency is missing
    pub dependency_requeue: Duration,
    /// Requeue interval while deletion is blocked by consumers
    pub finalizer_blocked_requeue: Duration,
    /// Backoff for retryable reconcile errors
    pub error_requeue: Duration,
    /// Backoff for non-retryable reconcile errors
    pub fatal_requeue: Duration,
    /// Timeout of one gateway endpoint probe
    pub probe_timeout: Duration,
    /// Retries of the best-effort data wipe
    pub wipe_max_elapsed: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_namespace: "storage-system".to_string(),
            disable_legacy_attachment_check: false,
            disable_hotplug_watch: false,
            csi_drivers: DEFAULT_CSI_DRIVERS.iter().map(|d| d.to_string()).collect(),
            dependency_requeue: Duration::from_secs(10),
            finalizer_blocked_requeue: Duration::from_secs(10),
            error_requeue: Duration::from_secs(30),
            fatal_requeue: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
            wipe_max_elapsed: Duration::from_secs(30),
        }
    }
}

impl OperatorConfig {
    /// Whether a CSI driver is one this operator deploys
    pub fn is_managed_csi_driver(&self, driver: &str) -> bool {
        self.csi_drivers.iter().any(|d| d == driver)
    }
}
