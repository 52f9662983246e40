//! Kubernetes Resource Adapter
//!
//! Implements the resource ports on top of `kube::Api`. Finalizer updates
//! carry the resource version they were computed from, so a concurrent
//! writer makes the patch fail instead of losing a finalizer.

use crate::crd::{
    set_condition, AttachedVolume, BucketStatus, Condition, ObjectBucket, ObjectRealm, ObjectStore,
    ObjectZone, ObjectZoneGroup, Phase, StorageCluster,
};
use crate::domain::ports::{
    ClusterApi, ConsumerInventory, CsiVolume, MultisiteApi, ObjectKey, ObjectStoreApi,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// Field manager for every write made by the operator
pub const FIELD_MANAGER: &str = "storage-cluster-operator";

/// Swallow a 404 from a write to a resource that is already gone
fn ignore_not_found<T: Default>(result: std::result::Result<T, kube::Error>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

async fn update_finalizers<K, F>(api: &Api<K>, name: &str, update: F) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    F: FnOnce(&mut Vec<String>),
{
    let Some(obj) = api.get_opt(name).await? else {
        return Ok(());
    };
    let mut finalizers = obj.finalizers().to_vec();
    let before = finalizers.clone();
    update(&mut finalizers);
    if finalizers == before {
        return Ok(());
    }

    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": obj.resource_version(),
        }
    });
    ignore_not_found(
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ()),
    )
}

async fn patch_status<K>(api: &Api<K>, name: &str, status: serde_json::Value) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = json!({ "status": status });
    ignore_not_found(
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ()),
    )
}

/// Resource ports backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResources {
    client: Client,
}

impl KubeResources {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn clusters(&self, namespace: &str) -> Api<StorageCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn stores(&self, namespace: &str) -> Api<ObjectStore> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeResources {
    async fn get(&self, key: &ObjectKey) -> Result<Option<StorageCluster>> {
        Ok(self.clusters(&key.namespace).get_opt(&key.name).await?)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StorageCluster>> {
        let api: Api<StorageCluster> = match namespace {
            Some(ns) => self.clusters(ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn add_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        debug!(cluster = %key, finalizer, "Adding finalizer");
        update_finalizers(&self.clusters(&key.namespace), &key.name, |f| {
            if !f.iter().any(|x| x == finalizer) {
                f.push(finalizer.to_string());
            }
        })
        .await
    }

    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        debug!(cluster = %key, finalizer, "Removing finalizer");
        update_finalizers(&self.clusters(&key.namespace), &key.name, |f| {
            f.retain(|x| x != finalizer)
        })
        .await
    }

    async fn set_phase(&self, key: &ObjectKey, phase: Phase, message: Option<String>) -> Result<()> {
        let api = self.clusters(&key.namespace);
        let generation = match api.get_opt(&key.name).await? {
            Some(cluster) => cluster.metadata.generation,
            None => return Ok(()),
        };
        patch_status(
            &api,
            &key.name,
            json!({
                "phase": phase,
                "message": message,
                "observedGeneration": generation,
                "lastReconcileTime": Utc::now(),
            }),
        )
        .await
    }

    async fn set_condition(&self, key: &ObjectKey, condition: Condition) -> Result<()> {
        let api = self.clusters(&key.namespace);
        let Some(cluster) = api.get_opt(&key.name).await? else {
            return Ok(());
        };
        let mut conditions = cluster.status.map(|s| s.conditions).unwrap_or_default();
        set_condition(&mut conditions, condition);
        patch_status(&api, &key.name, json!({ "conditions": conditions })).await
    }
}

#[async_trait]
impl ObjectStoreApi for KubeResources {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ObjectStore>> {
        Ok(self.stores(&key.namespace).get_opt(&key.name).await?)
    }

    async fn add_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        debug!(store = %key, finalizer, "Adding finalizer");
        update_finalizers(&self.stores(&key.namespace), &key.name, |f| {
            if !f.iter().any(|x| x == finalizer) {
                f.push(finalizer.to_string());
            }
        })
        .await
    }

    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        debug!(store = %key, finalizer, "Removing finalizer");
        update_finalizers(&self.stores(&key.namespace), &key.name, |f| {
            f.retain(|x| x != finalizer)
        })
        .await
    }

    async fn set_phase(&self, key: &ObjectKey, phase: Phase, message: Option<String>) -> Result<()> {
        patch_status(
            &self.stores(&key.namespace),
            &key.name,
            json!({ "phase": phase, "message": message }),
        )
        .await
    }

    async fn set_bucket_status(&self, key: &ObjectKey, status: BucketStatus) -> Result<()> {
        patch_status(
            &self.stores(&key.namespace),
            &key.name,
            json!({ "bucketStatus": status }),
        )
        .await
    }
}

#[async_trait]
impl MultisiteApi for KubeResources {
    async fn get_zone(&self, namespace: &str, name: &str) -> Result<Option<ObjectZone>> {
        let api: Api<ObjectZone> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_zone_group(&self, namespace: &str, name: &str) -> Result<Option<ObjectZoneGroup>> {
        let api: Api<ObjectZoneGroup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_realm(&self, namespace: &str, name: &str) -> Result<Option<ObjectRealm>> {
        let api: Api<ObjectRealm> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

#[async_trait]
impl ConsumerInventory for KubeResources {
    async fn list_csi_volumes(&self) -> Result<Vec<CsiVolume>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let volumes = api.list(&ListParams::default()).await?;
        Ok(volumes.items.into_iter().filter_map(csi_volume).collect())
    }

    async fn list_attached_volumes(&self, namespace: &str) -> Result<Vec<AttachedVolume>> {
        let api: Api<AttachedVolume> = Api::namespaced(self.client.clone(), namespace);
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            // CRD not installed: no legacy attachments can exist
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(Vec::new()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn list_object_buckets(&self, selector: &str) -> Result<Vec<String>> {
        let api: Api<ObjectBucket> = Api::all(self.client.clone());
        match api.list(&ListParams::default().labels(selector)).await {
            Ok(list) => Ok(list.items.iter().map(|b| b.name_any()).collect()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(Vec::new()),
            Err(e) => Err(Error::from(e)),
        }
    }
}

fn csi_volume(pv: PersistentVolume) -> Option<CsiVolume> {
    let name = pv.name_any();
    let csi = pv.spec?.csi?;
    Some(CsiVolume {
        name,
        cluster_id: csi
            .volume_attributes
            .as_ref()
            .and_then(|attrs| attrs.get("clusterID"))
            .cloned(),
        driver: csi.driver,
    })
}
