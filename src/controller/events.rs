//! Event Classifier
//!
//! Decides which infrastructure events warrant a cluster reconcile:
//! nodes that become usable storage candidates, and hot-plug discovery
//! config maps whose device list changed.

use crate::crd::StorageCluster;
use crate::domain::ports::ObjectKey;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::runtime::watcher;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Label selecting the hot-plug discovery config maps
pub const DISCOVER_LABEL_KEY: &str = "app";
pub const DISCOVER_LABEL_VALUE: &str = "storage-discover";

/// Config map key holding the discovered device list
pub const DEVICES_KEY: &str = "devices";

pub struct EventClassifier {
    hotplug_enabled: bool,
    /// Last `devices` value seen per config map
    hotplug_seen: DashMap<ObjectKey, Option<String>>,
}

impl EventClassifier {
    pub fn new(hotplug_enabled: bool) -> Self {
        Self {
            hotplug_enabled,
            hotplug_seen: DashMap::new(),
        }
    }

    pub fn hotplug_enabled(&self) -> bool {
        self.hotplug_enabled
    }

    /// Clusters to reconcile because of a node event
    pub fn clusters_for_node(&self, node: &Node, clusters: &[Arc<StorageCluster>]) -> Vec<ObjectKey> {
        let node_name = node.metadata.name.as_deref().unwrap_or_default();
        if node.metadata.deletion_timestamp.is_some() || !node_is_candidate(node) {
            debug!(node = %node_name, "Node is not a storage candidate");
            return Vec::new();
        }

        clusters
            .iter()
            .filter(|c| {
                !c.is_external()
                    && !c.is_deleting()
                    && !c.spec.cleanup_policy.has_data_dir_clean_policy()
                    && c.selects_node(node_name)
            })
            .map(|c| ObjectKey::of(c.as_ref()))
            .collect()
    }

    /// Whether a hot-plug config map event changed the device list.
    ///
    /// The first sighting of a config map records its devices without
    /// triggering; deletion forgets it.
    pub fn hotplug_changed(&self, cm: &ConfigMap) -> bool {
        if !self.hotplug_enabled || !is_hotplug_config_map(cm) {
            return false;
        }

        let key = config_map_key(cm);
        if cm.metadata.deletion_timestamp.is_some() {
            self.hotplug_seen.remove(&key);
            return false;
        }

        let devices = cm.data.as_ref().and_then(|d| d.get(DEVICES_KEY)).cloned();
        match self.hotplug_seen.insert(key.clone(), devices.clone()) {
            None => {
                debug!(config_map = %key, "First sighting of hot-plug config map");
                false
            }
            Some(previous) => {
                let changed = previous != devices;
                if changed {
                    debug!(config_map = %key, "Hot-plug device list changed");
                }
                changed
            }
        }
    }

    /// Track one watch event of the hot-plug config maps.
    ///
    /// Returns the config maps to classify. A delete event forgets its
    /// config map, and a relist forgets every config map it no longer lists.
    pub fn config_map_event(&self, event: watcher::Event<ConfigMap>) -> Vec<ConfigMap> {
        match event {
            watcher::Event::Applied(cm) => vec![cm],
            watcher::Event::Deleted(cm) => {
                let key = config_map_key(&cm);
                debug!(config_map = %key, "Hot-plug config map deleted");
                self.hotplug_seen.remove(&key);
                Vec::new()
            }
            watcher::Event::Restarted(cms) => {
                let listed: HashSet<ObjectKey> = cms.iter().map(config_map_key).collect();
                self.hotplug_seen.retain(|key, _| listed.contains(key));
                cms
            }
        }
    }

    /// Clusters to reconcile because of a hot-plug config map event
    pub fn clusters_for_config_map(&self, cm: &ConfigMap, clusters: &[Arc<StorageCluster>]) -> Vec<ObjectKey> {
        if !self.hotplug_changed(cm) {
            return Vec::new();
        }
        let namespace = cm.metadata.namespace.as_deref().unwrap_or_default();
        clusters
            .iter()
            .filter(|c| c.metadata.namespace.as_deref() == Some(namespace) && !c.is_deleting())
            .map(|c| ObjectKey::of(c.as_ref()))
            .collect()
    }
}

fn config_map_key(cm: &ConfigMap) -> ObjectKey {
    ObjectKey::new(
        cm.metadata.namespace.clone().unwrap_or_default(),
        cm.metadata.name.clone().unwrap_or_default(),
    )
}

/// Ready and schedulable
pub fn node_is_candidate(node: &Node) -> bool {
    let schedulable = !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map_or(false, |conditions| {
            conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True")
        });
    schedulable && ready
}

pub fn is_hotplug_config_map(cm: &ConfigMap) -> bool {
    cm.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(DISCOVER_LABEL_KEY))
        .map_or(false, |v| v == DISCOVER_LABEL_VALUE)
}
