//! Cluster Registry
//!
//! In-memory map from namespace to the live handle of the cluster running
//! there. The namespace is the cluster identity: a second StorageCluster in
//! a namespace that already has a live handle is rejected, never merged or
//! overwritten.

use super::orchestration::OrchestrationState;
use super::signal::StopSignal;
use crate::crd::StorageCluster;
use crate::error::{Error, Result};
use kube::ResourceExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// Managed Cluster
// =============================================================================

/// Cluster-scoped settings shared with add-cluster hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSettings {
    pub external: bool,
    pub data_dir_host_path: String,
    pub image: String,
    pub health_interval: Duration,
}

impl ClusterSettings {
    fn from_cluster(cluster: &StorageCluster) -> Self {
        Self {
            external: cluster.is_external(),
            data_dir_host_path: cluster.spec.data_dir_host_path.clone(),
            image: cluster.spec.version.image.clone(),
            health_interval: Duration::from_secs(cluster.spec.health_check.interval.max(1)),
        }
    }
}

/// Live handle for the cluster of one namespace
#[derive(Debug)]
pub struct ManagedCluster {
    name: String,
    namespace: String,
    stop: StopSignal,
    settings: Arc<RwLock<ClusterSettings>>,
    orchestration: OrchestrationState,
}

impl ManagedCluster {
    pub fn new(cluster: &StorageCluster) -> Self {
        let namespace = cluster.namespace().unwrap_or_default();
        Self {
            name: cluster.name_any(),
            stop: StopSignal::new(format!("cluster {}", namespace)),
            namespace,
            settings: Arc::new(RwLock::new(ClusterSettings::from_cluster(cluster))),
            orchestration: OrchestrationState::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Signal stopping every background watcher of this cluster
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn orchestration(&self) -> &OrchestrationState {
        &self.orchestration
    }

    /// Shared settings handle, for hooks that keep a reference
    pub fn settings(&self) -> Arc<RwLock<ClusterSettings>> {
        self.settings.clone()
    }

    /// Copy of the current settings
    pub fn current_settings(&self) -> ClusterSettings {
        self.settings.read().clone()
    }

    /// Refresh cached settings from the latest spec
    pub fn refresh(&self, cluster: &StorageCluster) {
        let next = ClusterSettings::from_cluster(cluster);
        let mut settings = self.settings.write();
        if *settings != next {
            debug!(namespace = %self.namespace, "Cluster settings changed");
            *settings = next;
        }
    }
}

/// Callback run every time a cluster is (re)registered
pub type AddClusterHook = Arc<dyn Fn(&ManagedCluster) -> Result<()> + Send + Sync>;

// =============================================================================
// Registry
// =============================================================================

/// Namespace -> live cluster handle
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: Mutex<HashMap<String, Arc<ManagedCluster>>>,
}

impl ClusterRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Live handle for the namespace
    pub fn get(&self, namespace: &str) -> Option<Arc<ManagedCluster>> {
        self.clusters.lock().get(namespace).cloned()
    }

    /// Return the handle for this cluster, creating it when the namespace is free.
    ///
    /// Fails with [`Error::DuplicateCluster`] when another cluster owns the namespace.
    pub fn get_or_register(&self, cluster: &StorageCluster) -> Result<Arc<ManagedCluster>> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();

        let mut clusters = self.clusters.lock();
        if let Some(existing) = clusters.get(&namespace) {
            if existing.name() != name {
                return Err(Error::DuplicateCluster {
                    namespace,
                    existing: existing.name().to_string(),
                    rejected: name,
                });
            }
            return Ok(existing.clone());
        }

        let managed = Arc::new(ManagedCluster::new(cluster));
        clusters.insert(namespace.clone(), managed.clone());
        info!(namespace = %namespace, name = %name, "Registered cluster");
        Ok(managed)
    }

    /// Remove the handle if it belongs to the named cluster
    pub fn remove(&self, namespace: &str, name: &str) -> Option<Arc<ManagedCluster>> {
        let mut clusters = self.clusters.lock();
        match clusters.get(namespace) {
            Some(existing) if existing.name() == name => {
                info!(namespace = %namespace, name = %name, "Removed cluster from registry");
                clusters.remove(namespace)
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.lock().is_empty()
    }

    /// Namespaces with a live cluster, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<_> = self.clusters.lock().keys().cloned().collect();
        namespaces.sort();
        namespaces
    }
}
