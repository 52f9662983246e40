//! Health Monitoring Supervisor
//!
//! Runs one endpoint monitor per object store. Each monitor is an
//! independently cancellable background task that probes the gateway and
//! records the result in the store's `bucketStatus`. Probe and status
//! failures never stop a monitor; only [`HealthSupervisor::stop_monitoring`]
//! does. A monitor whose endpoint or interval changes is replaced.

use super::signal::StopSignal;
use super::tasks::spawn_periodic;
use crate::crd::{BucketHealth, BucketStatus};
use crate::domain::ports::{EndpointProberRef, ObjectKey, ObjectStoreApiRef};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where and how often to probe a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    /// Base URL of the gateway, probed with `GET <endpoint>/`
    pub endpoint: String,
    pub interval: Duration,
}

struct Monitor {
    target: MonitorTarget,
    signal: Arc<StopSignal>,
}

/// Per-store endpoint monitors
pub struct HealthSupervisor {
    monitors: Mutex<HashMap<ObjectKey, Monitor>>,
    prober: EndpointProberRef,
    stores: ObjectStoreApiRef,
}

impl HealthSupervisor {
    pub fn new(prober: EndpointProberRef, stores: ObjectStoreApiRef) -> Self {
        Self {
            monitors: Mutex::new(HashMap::new()),
            prober,
            stores,
        }
    }

    /// Start the monitor for a store unless one is already running for the
    /// same target. A running monitor with a different target is stopped and
    /// replaced.
    ///
    /// Returns true when a new monitor was spawned.
    pub fn start_monitoring(&self, key: &ObjectKey, target: MonitorTarget) -> bool {
        let signal = Arc::new(StopSignal::new(format!("object store {}", key)));
        let replaced = {
            let mut monitors = self.monitors.lock();
            if monitors.get(key).is_some_and(|m| m.target == target) {
                return false;
            }
            signal.start();
            monitors.insert(
                key.clone(),
                Monitor {
                    target: target.clone(),
                    signal: signal.clone(),
                },
            )
        };

        if let Some(old) = replaced {
            info!(store = %key, endpoint = %old.target.endpoint, "Replacing endpoint monitor");
            if let Err(e) = old.signal.fire() {
                error!(store = %key, error = %e, "Endpoint monitor stop signal");
            }
        }

        info!(
            store = %key,
            endpoint = %target.endpoint,
            interval_secs = target.interval.as_secs(),
            "Starting endpoint monitor"
        );

        let prober = self.prober.clone();
        let stores = self.stores.clone();
        let store = key.clone();
        let url = probe_url(&target.endpoint);
        spawn_periodic(
            format!("monitor {}", key),
            target.interval,
            signal.token(),
            move || {
                let prober = prober.clone();
                let stores = stores.clone();
                let store = store.clone();
                let url = url.clone();
                async move { check_once(&prober, &stores, &store, &url).await }
            },
        );
        true
    }

    /// Stop the monitor for a store. No-op when none is running.
    pub fn stop_monitoring(&self, key: &ObjectKey) -> bool {
        let Some(monitor) = self.monitors.lock().remove(key) else {
            debug!(store = %key, "No endpoint monitor to stop");
            return false;
        };
        if let Err(e) = monitor.signal.fire() {
            error!(store = %key, error = %e, "Endpoint monitor stop signal");
        }
        info!(store = %key, "Stopped endpoint monitor");
        true
    }

    pub fn is_monitoring(&self, key: &ObjectKey) -> bool {
        self.monitors.lock().contains_key(key)
    }

    /// Number of running monitors
    pub fn monitored(&self) -> usize {
        self.monitors.lock().len()
    }

    /// Stop every monitor
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.monitors.lock().drain().collect();
        for (key, monitor) in drained {
            if let Err(e) = monitor.signal.fire() {
                error!(store = %key, error = %e, "Endpoint monitor stop signal");
            }
        }
    }
}

impl std::fmt::Debug for HealthSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthSupervisor")
            .field("monitored", &self.monitored())
            .finish_non_exhaustive()
    }
}

fn probe_url(endpoint: &str) -> String {
    format!("{}/", endpoint.trim_end_matches('/'))
}

async fn check_once(
    prober: &EndpointProberRef,
    stores: &ObjectStoreApiRef,
    key: &ObjectKey,
    url: &str,
) {
    let status = match prober.probe(url).await {
        Ok(()) => BucketStatus {
            health: BucketHealth::Connected,
            details: "endpoint reachable".to_string(),
            last_checked: Some(Utc::now()),
        },
        Err(e) => {
            warn!(store = %key, url = %url, error = %e, "Endpoint probe failed");
            BucketStatus {
                health: BucketHealth::Failure,
                details: e.to_string(),
                last_checked: Some(Utc::now()),
            }
        }
    };

    if let Err(e) = stores.set_bucket_status(key, status).await {
        warn!(store = %key, error = %e, "Failed to record endpoint health");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::FakeWorld;

    fn target(endpoint: &str) -> MonitorTarget {
        MonitorTarget {
            endpoint: endpoint.to_string(),
            interval: Duration::from_millis(10),
        }
    }

    fn supervisor(world: &Arc<FakeWorld>) -> HealthSupervisor {
        HealthSupervisor::new(world.clone(), world.clone())
    }

    #[test]
    fn test_probe_url() {
        assert_eq!(probe_url("http://10.0.0.1:80"), "http://10.0.0.1:80/");
        assert_eq!(probe_url("http://10.0.0.1:80/"), "http://10.0.0.1:80/");
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let world = FakeWorld::new();
        let health = supervisor(&world);
        let key = ObjectKey::new("ns", "s3");

        assert!(health.start_monitoring(&key, target("http://gw")));
        assert!(!health.start_monitoring(&key, target("http://gw")));
        assert_eq!(health.monitored(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(world.bucket_statuses(&key).len() >= 1);
        health.shutdown();
    }

    #[tokio::test]
    async fn test_stop_is_noop_when_absent() {
        let world = FakeWorld::new();
        let health = supervisor(&world);
        assert!(!health.stop_monitoring(&ObjectKey::new("ns", "missing")));
    }

    #[tokio::test]
    async fn test_stop_halts_probes() {
        let world = FakeWorld::new();
        let health = supervisor(&world);
        let key = ObjectKey::new("ns", "s3");

        health.start_monitoring(&key, target("http://gw"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(health.stop_monitoring(&key));
        assert!(!health.is_monitoring(&key));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen = world.bucket_statuses(&key).len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(world.bucket_statuses(&key).len(), seen);

        // A stopped store can be monitored again
        assert!(health.start_monitoring(&key, target("http://gw")));
        health.shutdown();
    }

    #[tokio::test]
    async fn test_failed_probe_records_failure_and_keeps_running() {
        let world = FakeWorld::new();
        world.set_unreachable("http://down/");
        world.fail("set_bucket_status");
        let health = supervisor(&world);
        let key = ObjectKey::new("ns", "s3");

        health.start_monitoring(&key, target("http://down"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(world.bucket_statuses(&key).is_empty());
        assert!(health.is_monitoring(&key));

        world.heal("set_bucket_status");
        tokio::time::sleep(Duration::from_millis(40)).await;
        let statuses = world.bucket_statuses(&key);
        assert!(!statuses.is_empty());
        assert!(statuses.iter().all(|s| s.health == BucketHealth::Failure));
        health.shutdown();
    }

    #[tokio::test]
    async fn test_changed_target_replaces_monitor() {
        let world = FakeWorld::new();
        world.set_unreachable("http://old-gw/");
        let health = supervisor(&world);
        let key = ObjectKey::new("ns", "s3");

        assert!(health.start_monitoring(&key, target("http://old-gw")));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(world
            .bucket_statuses(&key)
            .iter()
            .all(|s| s.health == BucketHealth::Failure));

        assert!(health.start_monitoring(&key, target("http://new-gw")));
        assert_eq!(health.monitored(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let seen = world.bucket_statuses(&key).len();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let statuses = world.bucket_statuses(&key);
        assert!(statuses.len() > seen);
        assert!(statuses[seen..].iter().all(|s| s.health == BucketHealth::Connected));

        // Same endpoint with a new interval is a different target too
        let mut slower = target("http://new-gw");
        slower.interval = Duration::from_millis(20);
        assert!(health.start_monitoring(&key, slower.clone()));
        assert!(!health.start_monitoring(&key, slower));
        health.shutdown();
    }
}
