//! StorageCluster reconciler
//!
//! Adds the finalizer, dispatches deletion to the [`DeletionPipeline`], and
//! otherwise registers the cluster and drains its orchestration requests.
//! Concurrent passes for the same cluster collapse: a caller that finds a
//! pass running returns immediately and the running pass goes around again.

use super::context::Context;
use super::deletion::{DeletionOutcome, DeletionPipeline};
use super::registry::ManagedCluster;
use super::tasks::spawn_periodic;
use super::{has_finalizer, Reconciler, Requeue, CLUSTER_FINALIZER};
use crate::crd::{Condition, ConditionStatus, Phase, StorageCluster};
use crate::domain::ports::{ClusterApiRef, ClusterProvisionerRef, ObjectKey};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Condition written by the cluster health watcher
pub const HEALTHY_CONDITION: &str = "Healthy";

pub struct ClusterReconciler {
    ctx: Arc<Context>,
}

impl ClusterReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn on_add(&self, key: &ObjectKey, cluster: StorageCluster) -> Result<Requeue> {
        if cluster.spec.cleanup_policy.has_data_dir_clean_policy() {
            info!(cluster = %key, "Cleanup policy is set, skipping orchestration");
            return Ok(Requeue::Never);
        }

        if let Err(e) = cluster.validate() {
            self.record_failure(key, &e).await;
            return Err(e.context(format!("invalid spec for cluster {}", key)));
        }

        let managed = match self.ctx.registry.get_or_register(&cluster) {
            Ok(managed) => managed,
            Err(e) => {
                error!(cluster = %key, error = %e, "Rejecting cluster");
                self.record_failure(key, &e).await;
                return Err(e);
            }
        };
        managed.refresh(&cluster);
        for hook in self.ctx.add_cluster_hooks() {
            if let Err(e) = hook(&managed) {
                warn!(cluster = %key, error = %e, "Add-cluster hook failed");
            }
        }

        managed.orchestration().mark_needed();
        let mut current = Some(cluster);
        while managed.orchestration().try_enter() {
            let cluster = match current.take() {
                Some(cluster) => cluster,
                None => match self.ctx.clusters.get(key).await {
                    Ok(Some(cluster)) if !cluster.is_deleting() => cluster,
                    Ok(_) => {
                        managed.orchestration().exit();
                        debug!(cluster = %key, "Cluster gone or deleting, dropping pending pass");
                        break;
                    }
                    Err(e) => {
                        managed.orchestration().exit();
                        return Err(e.context(format!("failed to refetch cluster {}", key)));
                    }
                },
            };

            let result = self.converge(key, &cluster, &managed).await;
            managed.orchestration().exit();
            result?;
        }

        Ok(Requeue::Never)
    }

    async fn converge(&self, key: &ObjectKey, cluster: &StorageCluster, managed: &ManagedCluster) -> Result<()> {
        let (working, done) = if cluster.is_external() {
            (Phase::Connecting, Phase::Connected)
        } else {
            (Phase::Progressing, Phase::Ready)
        };

        self.ctx
            .clusters
            .set_phase(key, working, None)
            .await
            .with_context(|| format!("failed to update status of cluster {}", key))?;

        if let Err(e) = self.ctx.cluster_provisioner.orchestrate(cluster).await {
            self.record_failure(key, &e).await;
            return Err(e.context(format!("failed to orchestrate cluster {}", key)));
        }

        self.ctx
            .clusters
            .set_phase(key, done, None)
            .await
            .with_context(|| format!("failed to update status of cluster {}", key))?;

        if managed.stop_signal().start() {
            self.start_health_watcher(key, managed);
        }
        info!(cluster = %key, phase = %done, "Cluster converged");
        Ok(())
    }

    fn start_health_watcher(&self, key: &ObjectKey, managed: &ManagedCluster) {
        let interval = managed.current_settings().health_interval;
        info!(cluster = %key, interval_secs = interval.as_secs(), "Starting cluster health watcher");

        let clusters = self.ctx.clusters.clone();
        let provisioner = self.ctx.cluster_provisioner.clone();
        let key = key.clone();
        spawn_periodic(
            format!("health {}", key),
            interval,
            managed.stop_signal().token(),
            move || {
                let clusters = clusters.clone();
                let provisioner = provisioner.clone();
                let key = key.clone();
                async move { check_cluster_health(&clusters, &provisioner, &key).await }
            },
        );
    }

    async fn record_failure(&self, key: &ObjectKey, err: &Error) {
        if let Err(e) = self
            .ctx
            .clusters
            .set_phase(key, Phase::Failed, Some(err.to_string()))
            .await
        {
            warn!(cluster = %key, error = %e, "Failed to record cluster failure");
        }
    }
}

async fn check_cluster_health(clusters: &ClusterApiRef, provisioner: &ClusterProvisionerRef, key: &ObjectKey) {
    let condition = match provisioner.cluster_health(key).await {
        Ok(health) if health.healthy => {
            Condition::new(HEALTHY_CONDITION, ConditionStatus::True, "ClusterHealthy", health.message)
        }
        Ok(health) => Condition::new(HEALTHY_CONDITION, ConditionStatus::False, "ClusterUnhealthy", health.message),
        Err(e) => {
            warn!(cluster = %key, error = %e, "Cluster health check failed");
            Condition::new(HEALTHY_CONDITION, ConditionStatus::Unknown, "HealthCheckFailed", e.to_string())
        }
    };
    if let Err(e) = clusters.set_condition(key, condition).await {
        warn!(cluster = %key, error = %e, "Failed to record cluster health");
    }
}

#[async_trait]
impl Reconciler for ClusterReconciler {
    fn kind(&self) -> &'static str {
        "StorageCluster"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue> {
        let Some(cluster) = self
            .ctx
            .clusters
            .get(key)
            .await
            .with_context(|| format!("failed to get cluster {}", key))?
        else {
            debug!(cluster = %key, "Cluster not found, nothing to do");
            return Ok(Requeue::Never);
        };

        if cluster.is_deleting() {
            if !has_finalizer(&cluster, CLUSTER_FINALIZER) {
                return Ok(Requeue::Never);
            }
            return match DeletionPipeline::new(&self.ctx).run(&cluster).await? {
                DeletionOutcome::Completed => Ok(Requeue::Never),
                DeletionOutcome::Blocked { .. } => {
                    Ok(Requeue::After(self.ctx.config.finalizer_blocked_requeue))
                }
            };
        }

        if !has_finalizer(&cluster, CLUSTER_FINALIZER) {
            self.ctx
                .clusters
                .add_finalizer(key, CLUSTER_FINALIZER)
                .await
                .with_context(|| format!("failed to add finalizer to cluster {}", key))?;
        }

        self.on_add(key, cluster).await
    }
}
