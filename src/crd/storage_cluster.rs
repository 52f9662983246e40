//! StorageCluster CRD
//!
//! Declares the desired state of one storage cluster. The namespace is the
//! cluster identity: a second StorageCluster in the same namespace is
//! rejected by the controller.

use super::common::{Condition, Phase};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Confirmation string that enables data wiping on deletion
pub const DATA_DIR_CLEAN_CONFIRMATION: &str = "yes-really-destroy-data";

/// Host directories that may never be used as the data directory
pub const DISALLOWED_HOST_DIRECTORIES: &[&str] = &["/etc/storage", "/storage", "/var/log/storage"];

// =============================================================================
// StorageCluster CRD
// =============================================================================

/// StorageCluster describes a storage cluster managed (or connected to) by
/// the operator.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "StorageCluster",
    plural = "storageclusters",
    shortname = "sc",
    status = "StorageClusterStatus",
    namespaced,
    printcolumn = r#"{"name": "External", "type": "boolean", "jsonPath": ".spec.external.enable"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Message", "type": "string", "jsonPath": ".status.message"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterSpec {
    /// What happens to on-disk data when the cluster is deleted
    #[serde(default)]
    pub cleanup_policy: CleanupPolicy,

    /// Connect to an externally managed cluster instead of provisioning one
    #[serde(default)]
    pub external: ExternalSpec,

    /// Host path where daemons keep their configuration and data
    #[serde(default = "default_data_dir_host_path")]
    pub data_dir_host_path: String,

    /// Node selection for storage daemons
    #[serde(default)]
    pub storage: StorageSelection,

    /// Storage daemon version
    #[serde(default)]
    pub version: VersionSpec,

    /// Background health watcher settings
    #[serde(default)]
    pub health_check: ClusterHealthCheck,
}

impl Default for StorageClusterSpec {
    fn default() -> Self {
        Self {
            cleanup_policy: CleanupPolicy::default(),
            external: ExternalSpec::default(),
            data_dir_host_path: default_data_dir_host_path(),
            storage: StorageSelection::default(),
            version: VersionSpec::default(),
            health_check: ClusterHealthCheck::default(),
        }
    }
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Cleanup policy applied on deletion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPolicy {
    /// Must be `yes-really-destroy-data` to wipe data directories
    #[serde(default)]
    pub confirmation: String,

    /// How thoroughly disks are sanitized
    #[serde(default)]
    pub sanitize_disks: SanitizeMethod,
}

impl CleanupPolicy {
    /// Whether deletion must wipe the data directories
    pub fn has_data_dir_clean_policy(&self) -> bool {
        self.confirmation == DATA_DIR_CLEAN_CONFIRMATION
    }
}

/// Disk sanitization method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SanitizeMethod {
    #[default]
    Quick,
    Complete,
}

impl std::fmt::Display for SanitizeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SanitizeMethod::Quick => write!(f, "quick"),
            SanitizeMethod::Complete => write!(f, "complete"),
        }
    }
}

/// External cluster settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSpec {
    #[serde(default)]
    pub enable: bool,
}

/// Which nodes run storage daemons
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSelection {
    /// Consider every schedulable node
    #[serde(default)]
    pub use_all_nodes: bool,

    /// Explicit node names, used when `useAllNodes` is false
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Storage daemon image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VersionSpec {
    #[serde(default)]
    pub image: String,
}

/// Cluster health watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealthCheck {
    /// Seconds between two health checks
    #[serde(default = "default_health_interval")]
    pub interval: u64,
}

impl Default for ClusterHealthCheck {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the StorageCluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Option<Phase>,

    /// Human-readable detail for the phase
    #[serde(default)]
    pub message: Option<String>,

    /// Generation last acted upon
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// Last reconcile time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_reconcile_time: Option<DateTime<Utc>>,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn default_data_dir_host_path() -> String {
    "/var/lib/storage".to_string()
}

fn default_health_interval() -> u64 {
    60
}

// =============================================================================
// Implementations
// =============================================================================

impl StorageCluster {
    /// Whether the cluster is managed outside this operator
    pub fn is_external(&self) -> bool {
        self.spec.external.enable
    }

    /// Whether the resource carries a deletion timestamp
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Whether dependent resources (object stores) may be configured
    pub fn is_ready_for_dependents(&self) -> bool {
        !self.is_deleting() && matches!(self.phase(), Some(Phase::Ready) | Some(Phase::Connected))
    }

    /// Whether the given node is selected to run storage daemons
    pub fn selects_node(&self, node_name: &str) -> bool {
        self.spec.storage.use_all_nodes || self.spec.storage.nodes.iter().any(|n| n == node_name)
    }

    /// Check the spec for settings the daemons cannot run with
    pub fn validate(&self) -> Result<()> {
        let path = self.spec.data_dir_host_path.trim_end_matches('/');
        if path.is_empty() && !self.is_external() {
            return Err(Error::Validation(format!(
                "dataDirHostPath must be set for cluster {}",
                self.name_any()
            )));
        }
        if DISALLOWED_HOST_DIRECTORIES.contains(&path) {
            return Err(Error::Validation(format!(
                "dataDirHostPath {} is not allowed for cluster {}",
                self.spec.data_dir_host_path,
                self.name_any()
            )));
        }
        Ok(())
    }
}
