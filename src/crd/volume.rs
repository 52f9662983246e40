//! Volume consumer records
//!
//! Resources that block cluster or object store deletion while they exist.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// AttachedVolume records attachments made by the legacy volume plugin.
/// Records live in the operator namespace and name the cluster they use.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "AttachedVolume",
    plural = "attachedvolumes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AttachedVolumeSpec {
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// One attachment of a volume to a pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Namespace of the cluster serving the volume
    pub cluster_name: String,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub pod_namespace: String,
    #[serde(default)]
    pub read_only: bool,
}

impl AttachedVolume {
    /// Whether any attachment belongs to the cluster in `namespace`
    pub fn attached_to(&self, namespace: &str) -> bool {
        self.spec.attachments.iter().any(|a| a.cluster_name == namespace)
    }
}

/// ObjectBucket is owned by the bucket provisioner library; only the
/// metadata is read.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "objectbucket.io",
    version = "v1alpha1",
    kind = "ObjectBucket",
    plural = "objectbuckets"
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBucketSpec {
    #[serde(default)]
    pub storage_class_name: Option<String>,

    #[serde(default)]
    pub reclaim_policy: Option<String>,
}
