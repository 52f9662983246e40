//! Deletion Pipeline
//!
//! Tears a StorageCluster down in strict stage order:
//!
//! 1. Launch the data wipe when the cleanup policy asks for it
//! 2. Refuse to continue while volumes still consume the cluster
//! 3. Drop the registry entry and fire the cluster's stop signal
//! 4. Purge the resources created for an external cluster
//! 5. Remove the finalizer
//!
//! The wipe task launched in stage 1 is held back until the finalizer is
//! gone. A blocked or failed pass aborts it before it reaches the daemon;
//! the next pass starts over from stage 1.

use super::context::Context;
use super::CLUSTER_FINALIZER;
use crate::crd::{Condition, ConditionStatus, Phase, StorageCluster};
use crate::domain::ports::ObjectKey;
use crate::error::{Result, ResultExt};
use backoff::ExponentialBackoffBuilder;
use kube::ResourceExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Condition type set while deletion is blocked
pub const DELETING_CONDITION: &str = "Deleting";

/// Reason of the blocked-deletion condition
pub const DELETION_BLOCKED_REASON: &str = "ClusterDeletionBlocked";

/// Result of one deletion pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// Finalizer removed
    Completed,
    /// Consumers still depend on the cluster
    Blocked { reason: String },
}

/// Holds a launched wipe back until deletion is committed.
///
/// Dropping the gate without releasing it aborts the wipe.
struct WipeGate {
    release: CancellationToken,
    abort: CancellationToken,
    released: bool,
}

impl WipeGate {
    fn new() -> Self {
        Self {
            release: CancellationToken::new(),
            abort: CancellationToken::new(),
            released: false,
        }
    }

    fn release(mut self) {
        self.released = true;
        self.release.cancel();
    }
}

impl Drop for WipeGate {
    fn drop(&mut self) {
        if !self.released {
            self.abort.cancel();
        }
    }
}

pub struct DeletionPipeline<'a> {
    ctx: &'a Context,
}

impl<'a> DeletionPipeline<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, cluster: &StorageCluster) -> Result<DeletionOutcome> {
        let key = ObjectKey::of(cluster);

        if let Some(live) = self.ctx.registry.get(&key.namespace) {
            if live.name() != key.name {
                warn!(
                    cluster = %key,
                    live = %live.name(),
                    "Deleting duplicate cluster, leaving the live cluster untouched"
                );
                self.remove_finalizer(&key).await?;
                return Ok(DeletionOutcome::Completed);
            }
        }

        // Stage 1
        let wipe = if cluster.spec.cleanup_policy.has_data_dir_clean_policy() && !cluster.is_external() {
            self.ctx
                .clusters
                .set_phase(&key, Phase::Deleting, Some("cleaning up cluster data".to_string()))
                .await
                .with_context(|| format!("failed to set deleting phase on cluster {}", key))?;
            Some(self.launch_wipe(cluster))
        } else {
            None
        };

        // Stage 2
        let consumers = self
            .blocking_consumers(&key.namespace)
            .await
            .with_context(|| format!("failed to check consumers of cluster {}", key))?;
        if !consumers.is_empty() {
            drop(wipe);
            let reason = format!(
                "waiting for {} consumer(s) to be removed: {}",
                consumers.len(),
                consumers.join(", ")
            );
            info!(cluster = %key, %reason, "Cluster deletion blocked");
            let condition = Condition::new(
                DELETING_CONDITION,
                ConditionStatus::True,
                DELETION_BLOCKED_REASON,
                reason.clone(),
            );
            if let Err(e) = self.ctx.clusters.set_condition(&key, condition).await {
                warn!(cluster = %key, error = %e, "Failed to record blocked deletion");
            }
            return Ok(DeletionOutcome::Blocked { reason });
        }

        // Stage 3
        if let Some(managed) = self.ctx.registry.remove(&key.namespace, &key.name) {
            if let Err(e) = managed.stop_signal().fire() {
                error!(cluster = %key, error = %e, "Cluster stop signal");
            }
        }

        // Stage 4
        if cluster.is_external() {
            self.ctx
                .cluster_provisioner
                .purge_external(&key.namespace)
                .await
                .with_context(|| format!("failed to purge external resources of cluster {}", key))?;
        }

        // Stage 5
        self.remove_finalizer(&key).await?;
        if let Some(gate) = wipe {
            gate.release();
        }
        info!(cluster = %key, "Cluster deleted");
        Ok(DeletionOutcome::Completed)
    }

    async fn remove_finalizer(&self, key: &ObjectKey) -> Result<()> {
        self.ctx
            .clusters
            .remove_finalizer(key, CLUSTER_FINALIZER)
            .await
            .with_context(|| format!("failed to remove finalizer from cluster {}", key))
    }

    /// Names of the volumes still using the cluster of `namespace`
    async fn blocking_consumers(&self, namespace: &str) -> Result<Vec<String>> {
        let config = &self.ctx.config;
        let mut consumers: Vec<String> = self
            .ctx
            .consumers
            .list_csi_volumes()
            .await?
            .into_iter()
            .filter(|pv| {
                config.is_managed_csi_driver(&pv.driver) && pv.cluster_id.as_deref() == Some(namespace)
            })
            .map(|pv| format!("PersistentVolume/{}", pv.name))
            .collect();

        if config.disable_legacy_attachment_check {
            debug!(namespace = %namespace, "Legacy attachment check disabled");
        } else {
            consumers.extend(
                self.ctx
                    .consumers
                    .list_attached_volumes(&config.operator_namespace)
                    .await?
                    .into_iter()
                    .filter(|v| v.attached_to(namespace))
                    .map(|v| format!("AttachedVolume/{}", v.name_any())),
            );
        }
        Ok(consumers)
    }

    /// Spawn the best-effort wipe. It waits for the gate and its failure
    /// never blocks deletion.
    fn launch_wipe(&self, cluster: &StorageCluster) -> WipeGate {
        let gate = WipeGate::new();
        let provisioner = self.ctx.cluster_provisioner.clone();
        let cluster = Arc::new(cluster.clone());
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(self.ctx.config.wipe_max_elapsed))
            .build();
        let release = gate.release.clone();
        let cancel = gate.abort.clone();

        info!(
            cluster = %ObjectKey::of(cluster.as_ref()),
            sanitize = %cluster.spec.cleanup_policy.sanitize_disks,
            "Launching data wipe"
        );
        tokio::spawn(async move {
            let key = ObjectKey::of(cluster.as_ref());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(cluster = %key, "Data wipe aborted before it started");
                    return;
                }
                _ = release.cancelled() => {}
            }

            let result = backoff::future::retry(policy, || {
                let provisioner = provisioner.clone();
                let cluster = cluster.clone();
                let cancel = cancel.clone();
                async move {
                    provisioner
                        .wipe_data(&cluster, cancel.clone())
                        .await
                        .map_err(|e| {
                            if cancel.is_cancelled() {
                                backoff::Error::permanent(e)
                            } else {
                                backoff::Error::transient(e)
                            }
                        })
                }
            })
            .await;

            match result {
                Ok(()) => info!(cluster = %key, "Data wipe finished"),
                Err(e) => warn!(cluster = %key, error = %e, "Data wipe failed"),
            }
        });
        gate
    }
}
