//! Domain Ports - Core trait definitions for the storage cluster operator
//!
//! These traits define the boundaries between the reconciliation engine and
//! external systems. Adapters implement these traits to provide concrete
//! functionality: the Kubernetes API server, the storage daemon's admin
//! endpoint, and the gateway endpoints probed for health.

use crate::crd::{
    AttachedVolume, BucketStatus, Condition, ObjectRealm, ObjectStore, ObjectZone,
    ObjectZoneGroup, Phase, StorageCluster,
};
use crate::error::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Resource Identity
// =============================================================================

/// Namespace and name of a namespaced resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced resource; cluster-scoped resources get an empty namespace
    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Multisite / Cluster Context Types
// =============================================================================

/// Resolved realm -> zone group -> zone names for an object store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultisiteChain {
    pub realm: String,
    pub zone_group: String,
    pub zone: String,
}

impl MultisiteChain {
    pub fn new(
        realm: impl Into<String>,
        zone_group: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            realm: realm.into(),
            zone_group: zone_group.into(),
            zone: zone.into(),
        }
    }

    /// A single-site store is its own realm, zone group and zone
    pub fn single_site(store_name: &str) -> Self {
        Self::new(store_name, store_name, store_name)
    }
}

/// Read-only facts about the parent cluster, refreshed every pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterContext {
    /// Namespace of the cluster
    pub namespace: String,
    /// Name of the StorageCluster resource
    pub cluster_name: String,
    /// Whether the cluster is managed outside this operator
    pub external: bool,
    /// Lowest daemon version running in the cluster (unknown for external clusters)
    pub daemon_version: Option<String>,
}

/// Result of one cluster health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub healthy: bool,
    pub message: String,
}

/// A CSI persistent volume as seen by the consumer check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiVolume {
    pub name: String,
    pub driver: String,
    /// `clusterID` volume attribute
    pub cluster_id: Option<String>,
}

// =============================================================================
// Resource Access Ports
// =============================================================================

/// Port for reading and mutating StorageCluster resources
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a cluster; `None` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<StorageCluster>>;

    /// List clusters in one namespace, or everywhere
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StorageCluster>>;

    /// Add the finalizer if absent
    async fn add_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()>;

    /// Remove the finalizer; a missing resource is not an error
    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()>;

    /// Record the phase; a missing resource is not an error
    async fn set_phase(&self, key: &ObjectKey, phase: Phase, message: Option<String>) -> Result<()>;

    /// Set a status condition, replacing one of the same type
    async fn set_condition(&self, key: &ObjectKey, condition: Condition) -> Result<()>;
}

/// Port for reading and mutating ObjectStore resources
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ObjectStore>>;

    async fn add_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()>;

    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()>;

    async fn set_phase(&self, key: &ObjectKey, phase: Phase, message: Option<String>) -> Result<()>;

    /// Record the result of an endpoint probe
    async fn set_bucket_status(&self, key: &ObjectKey, status: BucketStatus) -> Result<()>;
}

/// Port for the multisite naming chain resources
#[async_trait]
pub trait MultisiteApi: Send + Sync {
    async fn get_zone(&self, namespace: &str, name: &str) -> Result<Option<ObjectZone>>;

    async fn get_zone_group(&self, namespace: &str, name: &str) -> Result<Option<ObjectZoneGroup>>;

    async fn get_realm(&self, namespace: &str, name: &str) -> Result<Option<ObjectRealm>>;
}

/// Port for enumerating consumers that block deletion
#[async_trait]
pub trait ConsumerInventory: Send + Sync {
    /// All CSI persistent volumes
    async fn list_csi_volumes(&self) -> Result<Vec<CsiVolume>>;

    /// Legacy attachment records in the given namespace
    async fn list_attached_volumes(&self, namespace: &str) -> Result<Vec<AttachedVolume>>;

    /// Names of object buckets matching a label selector
    async fn list_object_buckets(&self, selector: &str) -> Result<Vec<String>>;
}

// =============================================================================
// Storage Daemon Ports
// =============================================================================

/// Port for cluster-level operations against the storage daemon
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Converge the daemons of a cluster to its spec
    async fn orchestrate(&self, cluster: &StorageCluster) -> Result<()>;

    /// Check the health of a running cluster
    async fn cluster_health(&self, key: &ObjectKey) -> Result<ClusterHealth>;

    /// Wipe data directories and disks; stops early when `cancel` fires
    async fn wipe_data(&self, cluster: &StorageCluster, cancel: CancellationToken) -> Result<()>;

    /// Remove resources created to connect an external cluster
    async fn purge_external(&self, namespace: &str) -> Result<()>;
}

/// Port for object store operations
#[async_trait]
pub trait ObjectStoreProvisioner: Send + Sync {
    /// Read the cluster facts an object store pass depends on
    async fn cluster_context(&self, cluster: &StorageCluster) -> Result<ClusterContext>;

    /// Whether the zone of the chain exists in the daemon
    async fn zone_exists(&self, ctx: &ClusterContext, chain: &MultisiteChain) -> Result<bool>;

    /// Create or update the gateway Service; returns its cluster IP
    async fn reconcile_service(&self, store: &ObjectStore) -> Result<String>;

    /// Point the gateway Service at external gateway addresses
    async fn reconcile_external_endpoint(&self, store: &ObjectStore) -> Result<()>;

    async fn create_pools(&self, ctx: &ClusterContext, store: &ObjectStore) -> Result<()>;

    async fn configure_multisite(
        &self,
        ctx: &ClusterContext,
        store: &ObjectStore,
        service_ip: &str,
        chain: &MultisiteChain,
    ) -> Result<()>;

    async fn create_or_update_store(
        &self,
        ctx: &ClusterContext,
        store: &ObjectStore,
        chain: &MultisiteChain,
    ) -> Result<()>;

    async fn delete_store(&self, ctx: &ClusterContext, store: &ObjectStore) -> Result<()>;
}

/// Port for probing an HTTP endpoint
#[async_trait]
pub trait EndpointProber: Send + Sync {
    /// Succeeds when the endpoint answers
    async fn probe(&self, url: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterApiRef = Arc<dyn ClusterApi>;
pub type ObjectStoreApiRef = Arc<dyn ObjectStoreApi>;
pub type MultisiteApiRef = Arc<dyn MultisiteApi>;
pub type ConsumerInventoryRef = Arc<dyn ConsumerInventory>;
pub type ClusterProvisionerRef = Arc<dyn ClusterProvisioner>;
pub type ObjectStoreProvisionerRef = Arc<dyn ObjectStoreProvisioner>;
pub type EndpointProberRef = Arc<dyn EndpointProber>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new("storage-ns", "s3").to_string(), "storage-ns/s3");
    }

    #[test]
    fn test_single_site_chain() {
        let chain = MultisiteChain::single_site("s3");
        assert_eq!(chain, MultisiteChain::new("s3", "s3", "s3"));
    }
}
