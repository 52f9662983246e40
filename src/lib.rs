//! Storage Cluster Operator - Reconciliation Controller
//!
//! A Kubernetes operator that drives StorageCluster and multisite
//! ObjectStore resources toward their declared state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         kube-runtime Controllers                             │
//! │        StorageCluster (+ Node / hot-plug ConfigMap)     ObjectStore          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                          Reconciliation Engine                               │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Cluster      │  │    Deletion     │  │   ObjectStore + Multisite   │  │
//! │  │   Reconciler    │  │    Pipeline     │  │        Resolver             │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                    ┌───────────┴───────────┐   ┌─────────────────────────┐  │
//! │                    │   Cluster Registry    │   │   Health Supervisor     │  │
//! │                    │ (namespace -> handle) │   │ (per-store monitors)    │  │
//! │                    └───────────────────────┘   └─────────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                               Ports                                          │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │   Kubernetes API (kube)     │  │    Storage daemon admin (HTTP)      │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Reconcilers, registry, deletion pipeline, health monitors
//! - [`controlplane`]: Kubernetes and storage daemon adapters, controller runtime
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Resource keys and port traits
//! - [`config`]: Operator settings
//! - [`error`]: Error types and handling

pub mod config;
pub mod controller;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use config::OperatorConfig;

pub use controller::{
    ClusterReconciler, ClusterRegistry, Context, DeletionOutcome, DeletionPipeline,
    EventClassifier, HealthSupervisor, ManagedCluster, Metrics, MultisiteResolver,
    ObjectStoreReconciler, OrchestrationState, Reconciler, Requeue, StopSignal,
};

pub use controlplane::{
    run_controllers, AdminClient, AdminConfig, DaemonProvisioner, HttpProber, KubeResources,
};

pub use crd::{
    ObjectRealm, ObjectStore, ObjectStoreSpec, ObjectZone, ObjectZoneGroup, Phase,
    StorageCluster, StorageClusterSpec,
};

pub use domain::ports::{MultisiteChain, ObjectKey};

pub use error::{Error, ErrorAction, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
