//! Control plane adapters
//!
//! Concrete implementations of the domain ports and the controller runtime:
//! - `admin`: HTTP client for the storage daemon's admin endpoint
//! - `kube`: StorageCluster, ObjectStore and consumer lookups through the API server
//! - `provisioner`: daemon operations plus gateway Services and Endpoints
//! - `runner`: kube-runtime controllers driving the reconcilers

pub mod admin;
pub mod kube;
pub mod provisioner;
pub mod runner;

pub use self::admin::{AdminClient, AdminConfig, HttpProber, DEFAULT_ADMIN_ENDPOINT};
pub use self::kube::{KubeResources, FIELD_MANAGER};
pub use self::provisioner::DaemonProvisioner;
pub use self::runner::run_controllers;
