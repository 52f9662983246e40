//! Reconciliation engine
//!
//! Drives StorageCluster and ObjectStore resources toward their declared
//! state. Every dependency on the outside world goes through the ports in
//! [`crate::domain::ports`], so the engine runs unchanged against the
//! Kubernetes adapters or the in-memory fake used by the tests.
//!
//! - [`cluster`]: StorageCluster reconciler
//! - [`object_store`]: ObjectStore reconciler
//! - [`deletion`]: Cluster deletion pipeline
//! - [`multisite`]: Zone -> zone group -> realm resolution
//! - [`health`]: Per-store endpoint monitoring
//! - [`events`]: Node and hot-plug event classification
//! - [`registry`]: Namespace -> live cluster handle
//! - [`orchestration`]: One convergence pass per cluster at a time

pub mod cluster;
pub mod context;
pub mod deletion;
pub mod events;
pub mod health;
pub mod metrics;
pub mod multisite;
pub mod object_store;
pub mod orchestration;
pub mod registry;
pub mod signal;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::ClusterReconciler;
pub use context::Context;
pub use deletion::{DeletionOutcome, DeletionPipeline};
pub use events::EventClassifier;
pub use health::{HealthSupervisor, MonitorTarget};
pub use metrics::Metrics;
pub use multisite::{MultisiteResolver, Resolution};
pub use object_store::ObjectStoreReconciler;
pub use orchestration::{OrchestrationSnapshot, OrchestrationState};
pub use registry::{AddClusterHook, ClusterRegistry, ClusterSettings, ManagedCluster};
pub use signal::{SignalState, StopSignal};

use crate::domain::ObjectKey;
use crate::error::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::time::Duration;

/// Finalizer guarding StorageCluster deletion
pub const CLUSTER_FINALIZER: &str = "storagecluster.storage.billyronks.io";

/// Finalizer guarding ObjectStore deletion
pub const OBJECT_STORE_FINALIZER: &str = "objectstore.storage.billyronks.io";

/// What the runtime should do after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Wait for the next watch event
    Never,
    /// Run again after the duration
    After(Duration),
}

/// One reconciler variant
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Kind of the resource this reconciler drives
    fn kind(&self) -> &'static str;

    /// Run one pass for the resource. `Err` requeues with backoff.
    async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue>;
}

/// Whether the resource carries the finalizer
pub fn has_finalizer<K: ResourceExt>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}
