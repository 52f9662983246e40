//! Controller runtime wiring
//!
//! Builds one `kube::runtime::Controller` per reconciler and maps the
//! engine's [`Requeue`] and [`Error`] values onto controller actions.
//! Node and hot-plug config map events reach the cluster controller through
//! the [`EventClassifier`].

use crate::config::OperatorConfig;
use crate::controller::{
    ClusterReconciler, Context, EventClassifier, Metrics, ObjectStoreReconciler, Reconciler, Requeue,
};
use crate::crd::{ObjectStore, StorageCluster};
use crate::domain::ports::ObjectKey;
use crate::error::{Error, ErrorAction, Result};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Service};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{watcher, Controller, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Watch timeout, below the client read timeout so idle watches are
/// closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Label selector of the hot-plug discovery config maps
const HOTPLUG_SELECTOR: &str = "app=storage-discover";

/// State handed to the kube controller for one reconciler
struct ControllerState<R> {
    reconciler: R,
    ctx: Arc<Context>,
    metrics: Metrics,
}

impl<R: Reconciler> ControllerState<R> {
    fn update_gauges(&self) {
        self.metrics.managed_clusters.set(self.ctx.registry.len() as i64);
        self.metrics.active_monitors.set(self.ctx.health.monitored() as i64);
    }

    fn config(&self) -> &OperatorConfig {
        &self.ctx.config
    }
}

async fn reconcile<K, R>(obj: Arc<K>, state: Arc<ControllerState<R>>) -> Result<Action>
where
    K: Resource,
    R: Reconciler,
{
    let key = ObjectKey::of(obj.as_ref());
    let kind = state.reconciler.kind();
    debug!(kind, resource = %key, "Reconciling");

    let result = state.reconciler.reconcile(&key).await;
    state.update_gauges();
    match result {
        Ok(Requeue::Never) => {
            state.metrics.record(kind, "ok");
            Ok(Action::await_change())
        }
        Ok(Requeue::After(after)) => {
            state.metrics.record(kind, "requeue");
            Ok(Action::requeue(after))
        }
        Err(e) => {
            state.metrics.record(kind, "error");
            Err(e)
        }
    }
}

fn error_policy<K, R>(obj: Arc<K>, error: &Error, state: Arc<ControllerState<R>>) -> Action
where
    K: Resource,
    R: Reconciler,
{
    let key = ObjectKey::of(obj.as_ref());
    let kind = state.reconciler.kind();

    if error.is_not_found() {
        debug!(kind, resource = %key, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    match error.action() {
        ErrorAction::RequeueWithBackoff => {
            warn!(kind, resource = %key, error = %error, "Retryable error, will retry");
            Action::requeue(state.config().error_requeue)
        }
        ErrorAction::RequeueAfter(after) => {
            warn!(kind, resource = %key, error = %error, "Dependency error, will retry");
            Action::requeue(after)
        }
        ErrorAction::NoRequeue => {
            error!(kind, resource = %key, error = %error, "Non-retryable error");
            Action::requeue(state.config().fatal_requeue)
        }
    }
}

fn log_reconcile_result<T: Debug, E: Debug>(
    controller_name: &'static str,
) -> impl Fn(std::result::Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => debug!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

fn object_ref<K>(key: ObjectKey) -> ObjectRef<K>
where
    K: Resource<DynamicType = ()>,
{
    ObjectRef::new(&key.name).within(&key.namespace)
}

/// Run the StorageCluster and ObjectStore controllers until shutdown
pub async fn run_controllers(client: Client, ctx: Arc<Context>, metrics: Metrics) {
    let watcher_config = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let classifier = Arc::new(EventClassifier::new(!ctx.config.disable_hotplug_watch));

    // StorageCluster controller
    let clusters: Api<StorageCluster> = Api::all(client.clone());
    let cluster_controller = Controller::new(clusters, watcher_config());
    let cluster_store = cluster_controller.store();

    let node_classifier = classifier.clone();
    let node_store = cluster_store.clone();
    let mut cluster_controller = cluster_controller.watches(
        Api::<Node>::all(client.clone()),
        watcher_config(),
        move |node| {
            let clusters = node_store.state();
            let keys = node_classifier.clusters_for_node(&node, &clusters);
            if !keys.is_empty() {
                debug!(node = %node.name_any(), clusters = keys.len(), "Node event triggers reconcile");
            }
            keys.into_iter().map(object_ref::<StorageCluster>).collect::<Vec<_>>()
        },
    );

    if classifier.hotplug_enabled() {
        // Delete and relist events reach the classifier before the mapper
        let event_classifier = classifier.clone();
        let config_maps = watcher(
            Api::<ConfigMap>::all(client.clone()),
            watcher_config().labels(HOTPLUG_SELECTOR),
        )
        .default_backoff()
        .map_ok(move |event| {
            futures::stream::iter(event_classifier.config_map_event(event).into_iter().map(Ok))
        })
        .try_flatten();

        let cm_classifier = classifier.clone();
        let cm_store = cluster_store.clone();
        cluster_controller = cluster_controller.watches_stream(config_maps, move |cm| {
            let clusters = cm_store.state();
            cm_classifier
                .clusters_for_config_map(&cm, &clusters)
                .into_iter()
                .map(object_ref::<StorageCluster>)
                .collect::<Vec<_>>()
        });
        info!("- hot-plug config map watch");
    } else {
        info!("Hot-plug config map watch disabled");
    }

    let cluster_state = Arc::new(ControllerState {
        reconciler: ClusterReconciler::new(ctx.clone()),
        ctx: ctx.clone(),
        metrics: metrics.clone(),
    });
    let cluster_future = cluster_controller
        .shutdown_on_signal()
        .run(
            reconcile::<StorageCluster, ClusterReconciler>,
            error_policy::<StorageCluster, ClusterReconciler>,
            cluster_state,
        )
        .for_each(log_reconcile_result("StorageCluster"));

    // ObjectStore controller
    let stores: Api<ObjectStore> = Api::all(client.clone());
    let store_controller = Controller::new(stores, watcher_config());
    let store_store = store_controller.store();
    let store_controller = store_controller
        .owns(Api::<Service>::all(client.clone()), watcher_config())
        .watches(
            Api::<StorageCluster>::all(client.clone()),
            watcher_config(),
            move |cluster| {
                let namespace = cluster.namespace().unwrap_or_default();
                store_store
                    .state()
                    .iter()
                    .filter(|s| s.namespace().as_deref() == Some(namespace.as_str()))
                    .map(|s| ObjectRef::from_obj(s.as_ref()))
                    .collect::<Vec<_>>()
            },
        );

    let store_state = Arc::new(ControllerState {
        reconciler: ObjectStoreReconciler::new(ctx.clone()),
        ctx: ctx.clone(),
        metrics,
    });
    let store_future = store_controller
        .shutdown_on_signal()
        .run(
            reconcile::<ObjectStore, ObjectStoreReconciler>,
            error_policy::<ObjectStore, ObjectStoreReconciler>,
            store_state,
        )
        .for_each(log_reconcile_result("ObjectStore"));

    info!("- StorageCluster controller");
    info!("- ObjectStore controller");
    futures::join!(cluster_future, store_future);

    ctx.health.shutdown();
    info!("Controllers stopped");
}
