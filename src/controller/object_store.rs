//! ObjectStore reconciler
//!
//! An object store depends on the StorageCluster of its namespace and, when
//! it names a zone, on the multisite chain. Missing dependencies requeue the
//! store without marking it failed.

use super::context::Context;
use super::health::MonitorTarget;
use super::multisite::{MultisiteResolver, Resolution};
use super::{has_finalizer, Reconciler, Requeue, OBJECT_STORE_FINALIZER};
use crate::crd::{ObjectStore, Phase, StorageCluster};
use crate::domain::ports::{ClusterContext, MultisiteChain, ObjectKey};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ObjectStoreReconciler {
    ctx: Arc<Context>,
    resolver: MultisiteResolver,
}

impl ObjectStoreReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        let resolver = MultisiteResolver::new(ctx.multisite.clone());
        Self { ctx, resolver }
    }

    /// The cluster serving the store's namespace
    async fn parent_cluster(&self, namespace: &str) -> Result<Option<StorageCluster>> {
        let clusters = self.ctx.clusters.list(Some(namespace)).await?;
        let live = self.ctx.registry.get(namespace);
        let mut candidates = clusters.into_iter();
        Ok(match live {
            Some(live) => candidates.find(|c| c.name_any() == live.name()),
            None => candidates.next(),
        })
    }

    async fn delete(&self, key: &ObjectKey, store: &ObjectStore, cluster_ctx: &ClusterContext) -> Result<Requeue> {
        let blocked = self.ctx.config.finalizer_blocked_requeue;
        let selector = store.bucket_provisioner_selector();
        match self.ctx.consumers.list_object_buckets(&selector).await {
            Ok(buckets) if !buckets.is_empty() => {
                info!(
                    store = %key,
                    buckets = buckets.len(),
                    "Object store deletion blocked by remaining buckets"
                );
                return Ok(Requeue::After(blocked));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(store = %key, error = %e, "Failed to list buckets, retrying deletion later");
                return Ok(Requeue::After(blocked));
            }
        }

        self.ctx.health.stop_monitoring(key);
        self.ctx
            .store_provisioner
            .delete_store(cluster_ctx, store)
            .await
            .with_context(|| format!("failed to delete object store {}", key))?;
        self.remove_finalizer(key).await?;
        info!(store = %key, "Object store deleted");
        Ok(Requeue::Never)
    }

    async fn remove_finalizer(&self, key: &ObjectKey) -> Result<()> {
        self.ctx
            .object_stores
            .remove_finalizer(key, OBJECT_STORE_FINALIZER)
            .await
            .with_context(|| format!("failed to remove finalizer from object store {}", key))
    }

    async fn converge(&self, key: &ObjectKey, store: &ObjectStore, cluster_ctx: &ClusterContext) -> Result<Option<String>> {
        let provisioner = &self.ctx.store_provisioner;

        if cluster_ctx.external {
            let ip = self
                .step(key, "reconcile gateway service", provisioner.reconcile_service(store).await)
                .await?;
            self.step(
                key,
                "reconcile external gateway endpoint",
                provisioner.reconcile_external_endpoint(store).await,
            )
            .await?;
            return Ok(Some(ip));
        }

        let chain = match self
            .step(key, "resolve multisite configuration", self.resolver.resolve(store).await)
            .await?
        {
            Resolution::Resolved(chain) => chain,
            Resolution::Waiting { kind, name } => {
                info!(store = %key, kind, name = %name, "Waiting for multisite dependency");
                return Ok(None);
            }
        };

        if store.is_multisite() && !self.zone_ready(key, cluster_ctx, &chain).await? {
            return Ok(None);
        }

        let ip = self
            .step(key, "reconcile gateway service", provisioner.reconcile_service(store).await)
            .await?;
        self.step(key, "create pools", provisioner.create_pools(cluster_ctx, store).await)
            .await?;
        self.step(
            key,
            "configure multisite",
            provisioner.configure_multisite(cluster_ctx, store, &ip, &chain).await,
        )
        .await?;
        self.step(
            key,
            "create or update object store",
            provisioner.create_or_update_store(cluster_ctx, store, &chain).await,
        )
        .await?;
        Ok(Some(ip))
    }

    async fn zone_ready(&self, key: &ObjectKey, cluster_ctx: &ClusterContext, chain: &MultisiteChain) -> Result<bool> {
        let exists = self
            .step(
                key,
                "verify multisite zone",
                self.ctx.store_provisioner.zone_exists(cluster_ctx, chain).await,
            )
            .await?;
        if !exists {
            info!(store = %key, zone = %chain.zone, "Zone not yet created in the storage daemon");
        }
        Ok(exists)
    }

    /// Record a failed step on the store and wrap the error
    async fn step<T>(&self, key: &ObjectKey, what: &str, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let e = e.context(format!("failed to {} for object store {}", what, key));
                self.record_failure(key, &e).await;
                Err(e)
            }
        }
    }

    async fn record_failure(&self, key: &ObjectKey, err: &Error) {
        if let Err(e) = self
            .ctx
            .object_stores
            .set_phase(key, Phase::Failed, Some(err.to_string()))
            .await
        {
            warn!(store = %key, error = %e, "Failed to record object store failure");
        }
    }

    fn monitor_target(store: &ObjectStore, cluster_ctx: &ClusterContext, service_ip: &str) -> Option<MonitorTarget> {
        let port = store.gateway_port()?;
        let host = if cluster_ctx.external {
            store.spec.gateway.external_endpoints.first()?.as_str()
        } else {
            service_ip
        };
        Some(MonitorTarget {
            endpoint: format!("http://{}:{}", host, port),
            interval: Duration::from_secs(store.spec.health_check.bucket.interval.max(1)),
        })
    }
}

#[async_trait]
impl Reconciler for ObjectStoreReconciler {
    fn kind(&self) -> &'static str {
        "ObjectStore"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue> {
        let Some(store) = self
            .ctx
            .object_stores
            .get(key)
            .await
            .with_context(|| format!("failed to get object store {}", key))?
        else {
            debug!(store = %key, "Object store not found, nothing to do");
            self.ctx.health.stop_monitoring(key);
            return Ok(Requeue::Never);
        };

        if store.status.is_none() {
            self.ctx
                .object_stores
                .set_phase(key, Phase::Progressing, None)
                .await
                .with_context(|| format!("failed to initialize status of object store {}", key))?;
        }

        let deleting = store.is_deleting();
        let finalized = has_finalizer(&store, OBJECT_STORE_FINALIZER);
        if deleting && !finalized {
            return Ok(Requeue::Never);
        }
        if !deleting && !finalized {
            self.ctx
                .object_stores
                .add_finalizer(key, OBJECT_STORE_FINALIZER)
                .await
                .with_context(|| format!("failed to add finalizer to object store {}", key))?;
        }

        let dependency = self.ctx.config.dependency_requeue;
        let cluster = self
            .parent_cluster(&key.namespace)
            .await
            .with_context(|| format!("failed to get cluster for object store {}", key))?;
        let cluster = match cluster {
            Some(cluster) if deleting && cluster.is_deleting() => {
                info!(store = %key, "Cluster is being deleted, releasing object store");
                self.ctx.health.stop_monitoring(key);
                self.remove_finalizer(key).await?;
                return Ok(Requeue::Never);
            }
            None if deleting => {
                info!(store = %key, "No cluster left, releasing object store");
                self.ctx.health.stop_monitoring(key);
                self.remove_finalizer(key).await?;
                return Ok(Requeue::Never);
            }
            None => {
                info!(store = %key, "Waiting for a cluster in the namespace");
                return Ok(Requeue::After(dependency));
            }
            Some(cluster) if !deleting && !cluster.is_ready_for_dependents() => {
                info!(store = %key, cluster = %cluster.name_any(), "Waiting for cluster to be ready");
                return Ok(Requeue::After(dependency));
            }
            Some(cluster) => cluster,
        };

        let cluster_ctx = self
            .ctx
            .store_provisioner
            .cluster_context(&cluster)
            .await
            .with_context(|| format!("failed to read cluster context for object store {}", key))?;

        if deleting {
            return self.delete(key, &store, &cluster_ctx).await;
        }

        if let Err(e) = store.validate(cluster_ctx.external) {
            let e = e.context(format!("invalid spec for object store {}", key));
            self.record_failure(key, &e).await;
            return Err(e);
        }

        let Some(service_ip) = self.converge(key, &store, &cluster_ctx).await? else {
            return Ok(Requeue::After(dependency));
        };

        if store.spec.health_check.bucket.enabled {
            match Self::monitor_target(&store, &cluster_ctx, &service_ip) {
                Some(target) => {
                    self.ctx.health.start_monitoring(key, target);
                }
                None => warn!(store = %key, "No endpoint to monitor"),
            }
        } else {
            self.ctx.health.stop_monitoring(key);
        }

        self.ctx
            .object_stores
            .set_phase(key, Phase::Ready, None)
            .await
            .with_context(|| format!("failed to update status of object store {}", key))?;
        info!(store = %key, "Object store ready");
        Ok(Requeue::Never)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{self, FakeWorld};
    use assert_matches::assert_matches;

    fn key() -> ObjectKey {
        ObjectKey::new("ns", "s3")
    }

    fn setup() -> (Arc<FakeWorld>, Arc<Context>, ObjectStoreReconciler) {
        let world = FakeWorld::new();
        let ctx = Arc::new(world.context());
        let reconciler = ObjectStoreReconciler::new(ctx.clone());
        (world, ctx, reconciler)
    }

    fn ready_cluster(world: &FakeWorld) {
        world.insert_cluster(testing::cluster_in_phase("ns", "storage", Phase::Ready));
    }

    fn selector() -> String {
        testing::store("ns", "s3").bucket_provisioner_selector()
    }

    #[tokio::test]
    async fn test_missing_store_is_not_an_error() {
        let (world, _, reconciler) = setup();
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Requeue::Never);
        assert!(world.calls().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_cluster_with_finalizer_in_place() {
        let (world, ctx, reconciler) = setup();
        world.insert_store(testing::store("ns", "s3"));

        assert_eq!(
            reconciler.reconcile(&key()).await.unwrap(),
            Requeue::After(ctx.config.dependency_requeue)
        );
        let store = world.store_of(&key()).unwrap();
        assert!(has_finalizer(&store, OBJECT_STORE_FINALIZER));
        assert_eq!(world.store_phase(&key()), Some(Phase::Progressing));
        assert!(world.position("set_store_phase") < world.position("add_store_finalizer"));
        assert!(!world.called("reconcile_service"));
    }

    #[tokio::test]
    async fn test_waits_for_cluster_ready() {
        let (world, ctx, reconciler) = setup();
        world.insert_cluster(testing::cluster_in_phase("ns", "storage", Phase::Progressing));
        world.insert_store(testing::store("ns", "s3"));

        assert_eq!(
            reconciler.reconcile(&key()).await.unwrap(),
            Requeue::After(ctx.config.dependency_requeue)
        );
        assert!(!world.called("cluster_context"));
    }

    #[tokio::test]
    async fn test_single_site_store_converges() {
        let (world, ctx, reconciler) = setup();
        ready_cluster(&world);
        world.insert_store(testing::store("ns", "s3"));

        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Requeue::Never);
        assert_eq!(world.store_phase(&key()), Some(Phase::Ready));

        let order: Vec<_> = [
            "reconcile_service",
            "create_pools",
            "configure_multisite",
            "create_or_update_store",
        ]
        .iter()
        .map(|op| world.position(op).unwrap())
        .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(world
            .calls()
            .contains(&"configure_multisite ns/s3 10.96.0.10 s3/s3/s3".to_string()));
        assert!(!world.called("zone_exists"));
        assert!(!ctx.health.is_monitoring(&key()));
    }

    #[tokio::test]
    async fn test_multisite_store_waits_for_chain_and_zone() {
        let (world, ctx, reconciler) = setup();
        ready_cluster(&world);
        let mut store = testing::store("ns", "s3");
        store.spec.zone.name = "z1".into();
        world.insert_store(store);

        let wait = Requeue::After(ctx.config.dependency_requeue);
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), wait);

        world.insert_zone("ns", "z1", "g1");
        world.insert_zone_group("ns", "g1", "r1");
        world.insert_realm("ns", "r1");
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), wait);
        assert!(world.called("zone_exists"));
        assert!(!world.called("reconcile_service"));

        world.insert_daemon_zone("z1");
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Requeue::Never);
        assert!(world
            .calls()
            .contains(&"configure_multisite ns/s3 10.96.0.10 r1/g1/z1".to_string()));
        assert_ne!(world.store_phase(&key()), Some(Phase::Failed));
    }

    #[tokio::test]
    async fn test_external_cluster_only_points_service() {
        let (world, _, reconciler) = setup();
        let mut cluster = testing::cluster_in_phase("ns", "storage", Phase::Connected);
        cluster.spec.external.enable = true;
        world.insert_cluster(cluster);
        let mut store = testing::store("ns", "s3");
        store.spec.gateway.external_endpoints = vec!["192.168.1.10".into()];
        world.insert_store(store);

        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Requeue::Never);
        assert!(world.called("reconcile_external_endpoint"));
        assert!(!world.called("create_pools"));
        assert!(!world.called("get_zone"));
    }

    #[tokio::test]
    async fn test_step_failure_marks_failed() {
        let (world, _, reconciler) = setup();
        ready_cluster(&world);
        world.insert_store(testing::store("ns", "s3"));
        world.fail("create_pools");

        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(err.to_string().starts_with("failed to create pools for object store ns/s3"));
        assert!(err.is_retryable());
        assert_eq!(world.store_phase(&key()), Some(Phase::Failed));
        assert!(!world.called("configure_multisite"));
    }

    #[tokio::test]
    async fn test_invalid_store_fails_validation() {
        let (world, _, reconciler) = setup();
        ready_cluster(&world);
        let mut store = testing::store("ns", "s3");
        store.spec.gateway.port = 0;
        world.insert_store(store);

        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert_matches!(err.root(), Error::Validation(_));
        assert_eq!(world.store_phase(&key()), Some(Phase::Failed));
        assert!(!world.called("reconcile_service"));
    }

    #[tokio::test]
    async fn test_health_check_starts_and_deletion_stops_monitor() {
        let (world, ctx, reconciler) = setup();
        ready_cluster(&world);
        let mut store = testing::store("ns", "s3");
        store.spec.health_check.bucket.enabled = true;
        world.insert_store(store);

        reconciler.reconcile(&key()).await.unwrap();
        assert!(ctx.health.is_monitoring(&key()));
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(ctx.health.monitored(), 1);

        let current = world.store_of(&key()).unwrap();
        world.insert_store(testing::deleting(current, "other.io/keep"));
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Requeue::Never);
        assert!(!ctx.health.is_monitoring(&key()));
        assert!(world.called("delete_store"));
    }

    #[tokio::test]
    async fn test_buckets_block_deletion() {
        let (world, ctx, reconciler) = setup();
        ready_cluster(&world);
        world.insert_store(testing::deleting(testing::store("ns", "s3"), OBJECT_STORE_FINALIZER));
        world.add_bucket(&selector(), "bucket-1");

        assert_eq!(
            reconciler.reconcile(&key()).await.unwrap(),
            Requeue::After(ctx.config.finalizer_blocked_requeue)
        );
        assert!(!world.called("delete_store"));
        assert!(world.store_of(&key()).is_some());

        world.clear_buckets();
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Requeue::Never);
        assert!(world.position("delete_store") < world.position("remove_store_finalizer"));
        assert!(world.store_of(&key()).is_none());
    }

    #[tokio::test]
    async fn test_bucket_listing_failure_requeues() {
        let (world, ctx, reconciler) = setup();
        ready_cluster(&world);
        world.insert_store(testing::deleting(testing::store("ns", "s3"), OBJECT_STORE_FINALIZER));
        world.fail("list_object_buckets");

        assert_eq!(
            reconciler.reconcile(&key()).await.unwrap(),
            Requeue::After(ctx.config.finalizer_blocked_requeue)
        );
        assert!(world.store_of(&key()).is_some());
    }

    #[tokio::test]
    async fn test_deleting_store_without_cluster_is_released() {
        let (world, _, reconciler) = setup();
        world.insert_store(testing::deleting(testing::store("ns", "s3"), OBJECT_STORE_FINALIZER));

        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Requeue::Never);
        assert!(world.store_of(&key()).is_none());
        assert!(!world.called("delete_store"));
    }
}
