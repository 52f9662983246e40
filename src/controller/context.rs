//! Shared context for the reconcilers.
//!
//! Holds the ports, the cluster registry and the health supervisor. One
//! context is built at startup and shared by both reconcilers so they see
//! the same registry.

use super::health::HealthSupervisor;
use super::registry::{AddClusterHook, ClusterRegistry};
use crate::config::OperatorConfig;
use crate::domain::ports::{
    ClusterApiRef, ClusterProvisionerRef, ConsumerInventoryRef, EndpointProberRef,
    MultisiteApiRef, ObjectStoreApiRef, ObjectStoreProvisionerRef,
};
use std::sync::Arc;

/// Shared context for the reconcilers
#[derive(Clone)]
pub struct Context {
    pub clusters: ClusterApiRef,
    pub object_stores: ObjectStoreApiRef,
    pub multisite: MultisiteApiRef,
    pub consumers: ConsumerInventoryRef,
    pub cluster_provisioner: ClusterProvisionerRef,
    pub store_provisioner: ObjectStoreProvisionerRef,
    pub registry: Arc<ClusterRegistry>,
    pub health: Arc<HealthSupervisor>,
    pub config: Arc<OperatorConfig>,
    add_cluster_hooks: Vec<AddClusterHook>,
}

/// Ports the context is built from
pub struct Ports {
    pub clusters: ClusterApiRef,
    pub object_stores: ObjectStoreApiRef,
    pub multisite: MultisiteApiRef,
    pub consumers: ConsumerInventoryRef,
    pub cluster_provisioner: ClusterProvisionerRef,
    pub store_provisioner: ObjectStoreProvisionerRef,
    pub prober: EndpointProberRef,
}

impl Context {
    pub fn new(ports: Ports, config: OperatorConfig) -> Self {
        let health = Arc::new(HealthSupervisor::new(
            ports.prober,
            ports.object_stores.clone(),
        ));
        Self {
            clusters: ports.clusters,
            object_stores: ports.object_stores,
            multisite: ports.multisite,
            consumers: ports.consumers,
            cluster_provisioner: ports.cluster_provisioner,
            store_provisioner: ports.store_provisioner,
            registry: ClusterRegistry::new(),
            health,
            config: Arc::new(config),
            add_cluster_hooks: Vec::new(),
        }
    }

    /// Register a hook run every time a cluster is added or refreshed
    pub fn with_add_cluster_hook(mut self, hook: AddClusterHook) -> Self {
        self.add_cluster_hooks.push(hook);
        self
    }

    pub fn add_cluster_hooks(&self) -> &[AddClusterHook] {
        &self.add_cluster_hooks
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("add_cluster_hooks", &self.add_cluster_hooks.len())
            .finish_non_exhaustive()
    }
}
