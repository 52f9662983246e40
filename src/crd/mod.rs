//! Custom Resource Definitions for the Storage Cluster Operator
//!
//! This module contains all CRD types:
//! - StorageCluster: Desired state of one storage cluster per namespace
//! - ObjectStore: Object gateway instance served by a StorageCluster
//! - ObjectZone / ObjectZoneGroup / ObjectRealm: Multisite naming chain
//! - AttachedVolume: Legacy volume attachment records
//! - ObjectBucket: Buckets provisioned against an object store (external type)

pub mod common;
pub mod multisite;
pub mod object_store;
pub mod storage_cluster;
pub mod volume;

pub use common::*;
pub use multisite::*;
pub use object_store::*;
pub use storage_cluster::*;
pub use volume::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// API group shared by all operator-owned resources
pub const API_GROUP: &str = "storage.billyronks.io";

/// All CRDs owned by this operator, in installation order
pub fn owned_crds() -> Vec<CustomResourceDefinition> {
    vec![
        StorageCluster::crd(),
        ObjectStore::crd(),
        ObjectRealm::crd(),
        ObjectZoneGroup::crd(),
        ObjectZone::crd(),
        AttachedVolume::crd(),
    ]
}

/// Render the owned CRDs as a multi-document YAML stream
pub fn render_crds() -> crate::error::Result<String> {
    let mut out = String::new();
    for crd in owned_crds() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}
