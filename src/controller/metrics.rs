//! Prometheus metrics for the reconcilers

use crate::error::Result;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

#[derive(Clone)]
pub struct Metrics {
    /// Reconcile passes by controller and result (`ok`, `requeue`, `error`)
    pub reconciliations: IntCounterVec,
    pub managed_clusters: IntGauge,
    pub active_monitors: IntGauge,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let reconciliations = IntCounterVec::new(
            Opts::new(
                "storage_operator_reconciliations_total",
                "Reconcile passes by controller and result",
            ),
            &["controller", "result"],
        )?;
        let managed_clusters = IntGauge::new(
            "storage_operator_managed_clusters",
            "Clusters held in the registry",
        )?;
        let active_monitors = IntGauge::new(
            "storage_operator_active_endpoint_monitors",
            "Running object store endpoint monitors",
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(managed_clusters.clone()))?;
        registry.register(Box::new(active_monitors.clone()))?;

        Ok(Self {
            reconciliations,
            managed_clusters,
            active_monitors,
        })
    }

    pub fn record(&self, controller: &str, result: &str) {
        self.reconciliations.with_label_values(&[controller, result]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        metrics.record("StorageCluster", "ok");
        metrics.record("StorageCluster", "ok");
        metrics.managed_clusters.set(3);

        assert_eq!(
            metrics
                .reconciliations
                .with_label_values(&["StorageCluster", "ok"])
                .get(),
            2
        );
        assert_eq!(registry.gather().len(), 3);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        Metrics::new(&registry).unwrap();
        assert!(Metrics::new(&registry).is_err());
    }
}
