//! Benchmarks for the per-cluster bookkeeping on the reconcile hot path
//!
//! Target: registry lookups and orchestration flag updates well under 1µs

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
use kube::api::ObjectMeta;
use std::sync::Arc;
use storage_cluster_operator::controller::{ClusterRegistry, EventClassifier, OrchestrationState};
use storage_cluster_operator::crd::{StorageCluster, StorageClusterSpec};

fn cluster(namespace: &str) -> StorageCluster {
    let mut cluster = StorageCluster::new("storage", StorageClusterSpec::default());
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_registry");
    group.throughput(Throughput::Elements(1));

    let registry = ClusterRegistry::new();
    let clusters: Vec<_> = (0..1000).map(|i| cluster(&format!("ns-{:04}", i))).collect();
    for cluster in &clusters {
        let _ = registry.get_or_register(cluster);
    }

    group.bench_function("get_or_register_existing", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            counter += 1;
            let _ = registry.get_or_register(black_box(&clusters[counter % 1000]));
        });
    });

    group.bench_function("get", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            counter += 1;
            black_box(registry.get(&format!("ns-{:04}", counter % 1000)));
        });
    });

    group.finish();
}

fn bench_orchestration_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("orchestration_state");
    group.throughput(Throughput::Elements(1));

    group.bench_function("mark_enter_exit", |b| {
        let state = OrchestrationState::new();
        b.iter(|| {
            state.mark_needed();
            if state.try_enter() {
                state.exit();
            }
        });
    });

    group.throughput(Throughput::Elements(100));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let state = Arc::new(OrchestrationState::new());

    group.bench_function("concurrent_100_requests", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..100 {
                    let state = state.clone();
                    handles.push(tokio::spawn(async move {
                        state.mark_needed();
                        while state.try_enter() {
                            state.exit();
                        }
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

fn bench_node_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_classifier");
    group.throughput(Throughput::Elements(1));

    let classifier = EventClassifier::new(true);
    let clusters: Vec<_> = (0..1000)
        .map(|i| Arc::new(cluster(&format!("ns-{:04}", i))))
        .collect();
    let node = Node {
        metadata: ObjectMeta {
            name: Some("worker-1".into()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".into(),
                status: "True".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    group.bench_function("clusters_for_node_1000", |b| {
        b.iter(|| black_box(classifier.clusters_for_node(black_box(&node), &clusters)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registry,
    bench_orchestration_state,
    bench_node_classification,
);

criterion_main!(benches);
