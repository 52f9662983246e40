//! In-memory implementation of every port, for reconciler tests.
//!
//! Objects live in maps keyed by namespace/name. Removing the last finalizer
//! from an object with a deletion timestamp deletes it, as the API server
//! does. Any operation can be made to fail with [`FakeWorld::fail`].

use crate::config::OperatorConfig;
use crate::controller::context::{Context, Ports};
use crate::crd::{
    set_condition, AttachedVolume, Attachment, AttachedVolumeSpec, BucketStatus, Condition,
    GatewaySpec, ObjectRealm, ObjectRealmSpec, ObjectStore, ObjectStoreSpec, ObjectStoreStatus,
    ObjectZone, ObjectZoneGroup, ObjectZoneGroupSpec, ObjectZoneSpec, Phase, StorageCluster,
    StorageClusterSpec, StorageClusterStatus,
};
use crate::domain::ports::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use kube::Resource;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Fixtures
// =============================================================================

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        generation: Some(1),
        ..Default::default()
    }
}

/// Internal cluster with default spec
pub fn cluster(namespace: &str, name: &str) -> StorageCluster {
    StorageCluster {
        metadata: meta(namespace, name),
        spec: StorageClusterSpec::default(),
        status: None,
    }
}

/// Cluster in the given phase
pub fn cluster_in_phase(namespace: &str, name: &str, phase: Phase) -> StorageCluster {
    let mut c = cluster(namespace, name);
    c.status = Some(StorageClusterStatus {
        phase: Some(phase),
        ..Default::default()
    });
    c
}

/// Valid single-site store served on port 80
pub fn store(namespace: &str, name: &str) -> ObjectStore {
    ObjectStore {
        metadata: meta(namespace, name),
        spec: ObjectStoreSpec {
            gateway: GatewaySpec {
                port: 80,
                instances: 1,
                ..Default::default()
            },
            ..Default::default()
        },
        status: None,
    }
}

/// Mark an object as being deleted
pub fn deleting<K: Resource>(mut obj: K, finalizer: &str) -> K {
    let meta = obj.meta_mut();
    meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
    meta.finalizers.get_or_insert_with(Vec::new).push(finalizer.to_string());
    obj
}

/// CSI volume of the given driver bound to a cluster namespace
pub fn csi_volume(name: &str, driver: &str, cluster_id: &str) -> CsiVolume {
    CsiVolume {
        name: name.to_string(),
        driver: driver.to_string(),
        cluster_id: Some(cluster_id.to_string()),
    }
}

/// Legacy attachment record pointing at a cluster namespace
pub fn attached_volume(operator_namespace: &str, name: &str, cluster_namespace: &str) -> AttachedVolume {
    let mut volume = AttachedVolume::new(
        name,
        AttachedVolumeSpec {
            attachments: vec![Attachment {
                cluster_name: cluster_namespace.to_string(),
                node: "node-a".to_string(),
                pod_name: "app-0".to_string(),
                pod_namespace: "apps".to_string(),
                read_only: false,
            }],
        },
    );
    volume.metadata.namespace = Some(operator_namespace.to_string());
    volume
}

// =============================================================================
// Fake
// =============================================================================

#[derive(Default)]
pub struct FakeWorld {
    clusters: Mutex<BTreeMap<ObjectKey, StorageCluster>>,
    stores: Mutex<BTreeMap<ObjectKey, ObjectStore>>,
    zones: Mutex<BTreeMap<ObjectKey, ObjectZone>>,
    zone_groups: Mutex<BTreeMap<ObjectKey, ObjectZoneGroup>>,
    realms: Mutex<BTreeMap<ObjectKey, ObjectRealm>>,
    csi_volumes: Mutex<Vec<CsiVolume>>,
    attached_volumes: Mutex<Vec<AttachedVolume>>,
    buckets: Mutex<Vec<(String, String)>>,
    daemon_zones: Mutex<HashSet<String>>,
    unreachable: Mutex<HashSet<String>>,
    bucket_statuses: Mutex<BTreeMap<ObjectKey, Vec<BucketStatus>>>,
    failures: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    consumer_delay: Mutex<Option<Duration>>,
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn context(self: &Arc<Self>) -> Context {
        self.context_with(OperatorConfig {
            dependency_requeue: Duration::from_secs(10),
            finalizer_blocked_requeue: Duration::from_secs(10),
            wipe_max_elapsed: Duration::from_millis(200),
            ..OperatorConfig::default()
        })
    }

    pub fn context_with(self: &Arc<Self>, config: OperatorConfig) -> Context {
        Context::new(
            Ports {
                clusters: self.clone(),
                object_stores: self.clone(),
                multisite: self.clone(),
                consumers: self.clone(),
                cluster_provisioner: self.clone(),
                store_provisioner: self.clone(),
                prober: self.clone(),
            },
            config,
        )
    }

    // --- failure injection -------------------------------------------------

    pub fn fail(&self, op: &str) {
        self.failures.lock().insert(op.to_string());
    }

    pub fn heal(&self, op: &str) {
        self.failures.lock().remove(op);
    }

    fn record(&self, op: &str, subject: impl std::fmt::Display) -> Result<()> {
        self.calls.lock().push(format!("{} {}", op, subject));
        if self.failures.lock().contains(op) {
            return Err(Error::DaemonOperationFailed {
                operation: op.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    /// Make consumer listings take `delay`, like a slow API server
    pub fn set_consumer_delay(&self, delay: Duration) {
        *self.consumer_delay.lock() = Some(delay);
    }

    // --- call log ----------------------------------------------------------

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls of one operation
    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{} ", op);
        self.calls.lock().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    pub fn called(&self, op: &str) -> bool {
        self.count(op) > 0
    }

    /// Position of the first call of `op` in the log
    pub fn position(&self, op: &str) -> Option<usize> {
        let prefix = format!("{} ", op);
        self.calls.lock().iter().position(|c| c.starts_with(&prefix))
    }

    /// Poll until `op` was called or the timeout elapses
    pub async fn wait_for(&self, op: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.called(op) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.called(op)
    }

    // --- state setup -------------------------------------------------------

    pub fn insert_cluster(&self, cluster: StorageCluster) {
        self.clusters.lock().insert(ObjectKey::of(&cluster), cluster);
    }

    pub fn insert_store(&self, store: ObjectStore) {
        self.stores.lock().insert(ObjectKey::of(&store), store);
    }

    pub fn insert_zone(&self, namespace: &str, name: &str, zone_group: &str) {
        let mut zone = ObjectZone::new(name, ObjectZoneSpec { zone_group: zone_group.into() });
        zone.metadata.namespace = Some(namespace.into());
        self.zones.lock().insert(ObjectKey::new(namespace, name), zone);
    }

    pub fn insert_zone_group(&self, namespace: &str, name: &str, realm: &str) {
        let mut group = ObjectZoneGroup::new(name, ObjectZoneGroupSpec { realm: realm.into() });
        group.metadata.namespace = Some(namespace.into());
        self.zone_groups.lock().insert(ObjectKey::new(namespace, name), group);
    }

    pub fn insert_realm(&self, namespace: &str, name: &str) {
        let mut realm = ObjectRealm::new(name, ObjectRealmSpec::default());
        realm.metadata.namespace = Some(namespace.into());
        self.realms.lock().insert(ObjectKey::new(namespace, name), realm);
    }

    /// Zone known to the storage daemon
    pub fn insert_daemon_zone(&self, zone: &str) {
        self.daemon_zones.lock().insert(zone.to_string());
    }

    pub fn add_csi_volume(&self, volume: CsiVolume) {
        self.csi_volumes.lock().push(volume);
    }

    pub fn clear_csi_volumes(&self) {
        self.csi_volumes.lock().clear();
    }

    pub fn add_attached_volume(&self, volume: AttachedVolume) {
        self.attached_volumes.lock().push(volume);
    }

    pub fn clear_attached_volumes(&self) {
        self.attached_volumes.lock().clear();
    }

    pub fn add_bucket(&self, selector: &str, name: &str) {
        self.buckets.lock().push((selector.to_string(), name.to_string()));
    }

    pub fn clear_buckets(&self) {
        self.buckets.lock().clear();
    }

    pub fn set_unreachable(&self, url: &str) {
        self.unreachable.lock().insert(url.to_string());
    }

    // --- inspection --------------------------------------------------------

    pub fn cluster(&self, key: &ObjectKey) -> Option<StorageCluster> {
        self.clusters.lock().get(key).cloned()
    }

    pub fn store_of(&self, key: &ObjectKey) -> Option<ObjectStore> {
        self.stores.lock().get(key).cloned()
    }

    pub fn cluster_phase(&self, key: &ObjectKey) -> Option<Phase> {
        self.cluster(key).and_then(|c| c.phase())
    }

    pub fn store_phase(&self, key: &ObjectKey) -> Option<Phase> {
        self.store_of(key).and_then(|s| s.status.and_then(|st| st.phase))
    }

    pub fn cluster_condition(&self, key: &ObjectKey, type_: &str) -> Option<Condition> {
        self.cluster(key)?
            .status?
            .conditions
            .into_iter()
            .find(|c| c.r#type == type_)
    }

    pub fn bucket_statuses(&self, key: &ObjectKey) -> Vec<BucketStatus> {
        self.bucket_statuses.lock().get(key).cloned().unwrap_or_default()
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.failures.lock().contains(op) {
            return Err(Error::DaemonOperationFailed {
                operation: op.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn add_finalizer_to(meta: &mut ObjectMeta, finalizer: &str) {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
}

/// Returns true when the object should now be deleted
fn remove_finalizer_from(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if let Some(finalizers) = meta.finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
    meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().map_or(true, |f| f.is_empty())
}

// =============================================================================
// Resource ports
// =============================================================================

#[async_trait]
impl ClusterApi for FakeWorld {
    async fn get(&self, key: &ObjectKey) -> Result<Option<StorageCluster>> {
        self.check("get_cluster")?;
        Ok(self.cluster(key))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StorageCluster>> {
        self.check("list_clusters")?;
        Ok(self
            .clusters
            .lock()
            .iter()
            .filter(|(k, _)| namespace.map_or(true, |ns| k.namespace == ns))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn add_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        self.record("add_cluster_finalizer", key)?;
        if let Some(c) = self.clusters.lock().get_mut(key) {
            add_finalizer_to(&mut c.metadata, finalizer);
        }
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        self.record("remove_cluster_finalizer", key)?;
        let mut clusters = self.clusters.lock();
        let gone = clusters
            .get_mut(key)
            .map_or(false, |c| remove_finalizer_from(&mut c.metadata, finalizer));
        if gone {
            clusters.remove(key);
        }
        Ok(())
    }

    async fn set_phase(&self, key: &ObjectKey, phase: Phase, message: Option<String>) -> Result<()> {
        self.record("set_cluster_phase", format!("{} {}", key, phase))?;
        if let Some(c) = self.clusters.lock().get_mut(key) {
            let status = c.status.get_or_insert_with(Default::default);
            status.phase = Some(phase);
            status.message = message;
        }
        Ok(())
    }

    async fn set_condition(&self, key: &ObjectKey, condition: Condition) -> Result<()> {
        self.record("set_cluster_condition", format!("{} {}", key, condition.r#type))?;
        if let Some(c) = self.clusters.lock().get_mut(key) {
            let status = c.status.get_or_insert_with(Default::default);
            set_condition(&mut status.conditions, condition);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStoreApi for FakeWorld {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ObjectStore>> {
        self.check("get_store")?;
        Ok(self.store_of(key))
    }

    async fn add_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        self.record("add_store_finalizer", key)?;
        if let Some(s) = self.stores.lock().get_mut(key) {
            add_finalizer_to(&mut s.metadata, finalizer);
        }
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        self.record("remove_store_finalizer", key)?;
        let mut stores = self.stores.lock();
        let gone = stores
            .get_mut(key)
            .map_or(false, |s| remove_finalizer_from(&mut s.metadata, finalizer));
        if gone {
            stores.remove(key);
        }
        Ok(())
    }

    async fn set_phase(&self, key: &ObjectKey, phase: Phase, message: Option<String>) -> Result<()> {
        self.record("set_store_phase", format!("{} {}", key, phase))?;
        if let Some(s) = self.stores.lock().get_mut(key) {
            let status = s.status.get_or_insert_with(ObjectStoreStatus::default);
            status.phase = Some(phase);
            status.message = message;
        }
        Ok(())
    }

    async fn set_bucket_status(&self, key: &ObjectKey, status: BucketStatus) -> Result<()> {
        self.check("set_bucket_status")?;
        self.bucket_statuses
            .lock()
            .entry(key.clone())
            .or_default()
            .push(status);
        Ok(())
    }
}

#[async_trait]
impl MultisiteApi for FakeWorld {
    async fn get_zone(&self, namespace: &str, name: &str) -> Result<Option<ObjectZone>> {
        let key = ObjectKey::new(namespace, name);
        self.record("get_zone", &key)?;
        Ok(self.zones.lock().get(&key).cloned())
    }

    async fn get_zone_group(&self, namespace: &str, name: &str) -> Result<Option<ObjectZoneGroup>> {
        let key = ObjectKey::new(namespace, name);
        self.record("get_zone_group", &key)?;
        Ok(self.zone_groups.lock().get(&key).cloned())
    }

    async fn get_realm(&self, namespace: &str, name: &str) -> Result<Option<ObjectRealm>> {
        let key = ObjectKey::new(namespace, name);
        self.record("get_realm", &key)?;
        Ok(self.realms.lock().get(&key).cloned())
    }
}

#[async_trait]
impl ConsumerInventory for FakeWorld {
    async fn list_csi_volumes(&self) -> Result<Vec<CsiVolume>> {
        let delay = *self.consumer_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record("list_csi_volumes", "all")?;
        Ok(self.csi_volumes.lock().clone())
    }

    async fn list_attached_volumes(&self, namespace: &str) -> Result<Vec<AttachedVolume>> {
        self.record("list_attached_volumes", namespace)?;
        Ok(self
            .attached_volumes
            .lock()
            .iter()
            .filter(|v| v.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_object_buckets(&self, selector: &str) -> Result<Vec<String>> {
        self.record("list_object_buckets", selector)?;
        Ok(self
            .buckets
            .lock()
            .iter()
            .filter(|(s, _)| s == selector)
            .map(|(_, name)| name.clone())
            .collect())
    }
}

// =============================================================================
// Daemon ports
// =============================================================================

#[async_trait]
impl ClusterProvisioner for FakeWorld {
    async fn orchestrate(&self, cluster: &StorageCluster) -> Result<()> {
        self.record("orchestrate", ObjectKey::of(cluster))
    }

    async fn cluster_health(&self, key: &ObjectKey) -> Result<ClusterHealth> {
        self.record("cluster_health", key)?;
        Ok(ClusterHealth {
            healthy: true,
            message: "HEALTH_OK".to_string(),
        })
    }

    async fn wipe_data(&self, cluster: &StorageCluster, cancel: CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.record("wipe_data", ObjectKey::of(cluster))
    }

    async fn purge_external(&self, namespace: &str) -> Result<()> {
        self.record("purge_external", namespace)
    }
}

#[async_trait]
impl ObjectStoreProvisioner for FakeWorld {
    async fn cluster_context(&self, cluster: &StorageCluster) -> Result<ClusterContext> {
        let key = ObjectKey::of(cluster);
        self.record("cluster_context", &key)?;
        Ok(ClusterContext {
            namespace: key.namespace,
            cluster_name: key.name,
            external: cluster.is_external(),
            daemon_version: (!cluster.is_external()).then(|| "18.2.0".to_string()),
        })
    }

    async fn zone_exists(&self, ctx: &ClusterContext, chain: &MultisiteChain) -> Result<bool> {
        self.record("zone_exists", format!("{}/{}", ctx.namespace, chain.zone))?;
        Ok(self.daemon_zones.lock().contains(&chain.zone))
    }

    async fn reconcile_service(&self, store: &ObjectStore) -> Result<String> {
        self.record("reconcile_service", ObjectKey::of(store))?;
        Ok("10.96.0.10".to_string())
    }

    async fn reconcile_external_endpoint(&self, store: &ObjectStore) -> Result<()> {
        self.record("reconcile_external_endpoint", ObjectKey::of(store))
    }

    async fn create_pools(&self, _ctx: &ClusterContext, store: &ObjectStore) -> Result<()> {
        self.record("create_pools", ObjectKey::of(store))
    }

    async fn configure_multisite(
        &self,
        _ctx: &ClusterContext,
        store: &ObjectStore,
        service_ip: &str,
        chain: &MultisiteChain,
    ) -> Result<()> {
        self.record(
            "configure_multisite",
            format!("{} {} {}/{}/{}", ObjectKey::of(store), service_ip, chain.realm, chain.zone_group, chain.zone),
        )
    }

    async fn create_or_update_store(
        &self,
        _ctx: &ClusterContext,
        store: &ObjectStore,
        _chain: &MultisiteChain,
    ) -> Result<()> {
        self.record("create_or_update_store", ObjectKey::of(store))
    }

    async fn delete_store(&self, _ctx: &ClusterContext, store: &ObjectStore) -> Result<()> {
        self.record("delete_store", ObjectKey::of(store))
    }
}

#[async_trait]
impl EndpointProber for FakeWorld {
    async fn probe(&self, url: &str) -> Result<()> {
        self.check("probe")?;
        if self.unreachable.lock().contains(url) {
            return Err(Error::DaemonUnavailable {
                endpoint: url.to_string(),
            });
        }
        Ok(())
    }
}
