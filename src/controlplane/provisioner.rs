//! Storage Daemon Provisioner
//!
//! Implements the provisioner ports: daemon operations go to the admin
//! endpoint, gateway Services and external-cluster leftovers are handled
//! through the Kubernetes API.

use super::admin::AdminClient;
use super::kube::FIELD_MANAGER;
use crate::crd::{ObjectStore, StorageCluster};
use crate::domain::ports::{
    ClusterContext, ClusterHealth, ClusterProvisioner, MultisiteChain, ObjectKey,
    ObjectStoreProvisioner,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Secret, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Config map holding the monitor endpoints of an external cluster
pub const EXTERNAL_MON_ENDPOINTS: &str = "storage-mon-endpoints";

/// Secret holding the monitor credentials of an external cluster
pub const EXTERNAL_MON_SECRET: &str = "storage-mon";

pub struct DaemonProvisioner {
    admin: AdminClient,
    client: Client,
}

impl DaemonProvisioner {
    pub fn new(admin: AdminClient, client: Client) -> Self {
        Self { admin, client }
    }
}

fn gateway_labels(store: &ObjectStore) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "storage-gateway".to_string()),
        ("object-store".to_string(), store.name_any()),
    ])
}

/// Gateway Service for a store. External stores get no selector; their
/// Endpoints are managed explicitly.
fn gateway_service(store: &ObjectStore) -> Service {
    let mut ports = Vec::new();
    if store.spec.gateway.port > 0 {
        ports.push(ServicePort {
            name: Some("http".to_string()),
            port: i32::from(store.spec.gateway.port),
            target_port: Some(IntOrString::Int(i32::from(store.spec.gateway.port))),
            ..Default::default()
        });
    }
    if store.spec.gateway.secure_port > 0 {
        ports.push(ServicePort {
            name: Some("https".to_string()),
            port: i32::from(store.spec.gateway.secure_port),
            target_port: Some(IntOrString::Int(i32::from(store.spec.gateway.secure_port))),
            ..Default::default()
        });
    }
    let selector = store
        .spec
        .gateway
        .external_endpoints
        .is_empty()
        .then(|| gateway_labels(store));

    Service {
        metadata: ObjectMeta {
            name: Some(store.service_name()),
            namespace: store.namespace(),
            labels: Some(gateway_labels(store)),
            owner_references: store.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(ports),
            selector,
            ..Default::default()
        }),
        status: None,
    }
}

fn gateway_endpoints(store: &ObjectStore) -> Endpoints {
    let port = store.gateway_port().map(i32::from).unwrap_or(80);
    Endpoints {
        metadata: ObjectMeta {
            name: Some(store.service_name()),
            namespace: store.namespace(),
            labels: Some(gateway_labels(store)),
            owner_references: store.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                store
                    .spec
                    .gateway
                    .external_endpoints
                    .iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.clone(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![EndpointPort {
                name: Some("http".to_string()),
                port,
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

#[async_trait]
impl ClusterProvisioner for DaemonProvisioner {
    async fn orchestrate(&self, cluster: &StorageCluster) -> Result<()> {
        self.admin.orchestrate(cluster).await
    }

    async fn cluster_health(&self, key: &ObjectKey) -> Result<ClusterHealth> {
        self.admin.health(&key.namespace).await
    }

    async fn wipe_data(&self, cluster: &StorageCluster, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(cluster = %ObjectKey::of(cluster), "Wipe cancelled");
                Ok(())
            }
            result = self.admin.wipe(cluster) => result,
        }
    }

    async fn purge_external(&self, namespace: &str) -> Result<()> {
        let params = DeleteParams::default();

        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match config_maps.delete(EXTERNAL_MON_ENDPOINTS, &params).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match secrets.delete(EXTERNAL_MON_SECRET, &params).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }

        info!(namespace = %namespace, "Purged external cluster resources");
        Ok(())
    }
}

#[async_trait]
impl ObjectStoreProvisioner for DaemonProvisioner {
    async fn cluster_context(&self, cluster: &StorageCluster) -> Result<ClusterContext> {
        let key = ObjectKey::of(cluster);
        let daemon_version = if cluster.is_external() {
            None
        } else {
            Some(self.admin.version(&key.namespace).await?)
        };
        Ok(ClusterContext {
            namespace: key.namespace,
            cluster_name: key.name,
            external: cluster.is_external(),
            daemon_version,
        })
    }

    async fn zone_exists(&self, ctx: &ClusterContext, chain: &MultisiteChain) -> Result<bool> {
        self.admin.zone_exists(&ctx.namespace, &chain.zone).await
    }

    async fn reconcile_service(&self, store: &ObjectStore) -> Result<String> {
        let namespace = store.namespace().unwrap_or_default();
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let service = gateway_service(store);
        let applied = api
            .patch(
                &store.service_name(),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&service),
            )
            .await?;
        applied
            .spec
            .and_then(|s| s.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None")
            .ok_or_else(|| Error::MissingField(format!("{}: spec.clusterIP", store.service_name())))
    }

    async fn reconcile_external_endpoint(&self, store: &ObjectStore) -> Result<()> {
        let namespace = store.namespace().unwrap_or_default();
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &store.service_name(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&gateway_endpoints(store)),
        )
        .await?;
        Ok(())
    }

    async fn create_pools(&self, ctx: &ClusterContext, store: &ObjectStore) -> Result<()> {
        self.admin.create_pools(&ctx.namespace, store).await
    }

    async fn configure_multisite(
        &self,
        ctx: &ClusterContext,
        store: &ObjectStore,
        service_ip: &str,
        chain: &MultisiteChain,
    ) -> Result<()> {
        self.admin
            .configure_multisite(&ctx.namespace, store, service_ip, chain)
            .await
    }

    async fn create_or_update_store(
        &self,
        ctx: &ClusterContext,
        store: &ObjectStore,
        chain: &MultisiteChain,
    ) -> Result<()> {
        self.admin.put_store(&ctx.namespace, store, chain).await
    }

    async fn delete_store(&self, ctx: &ClusterContext, store: &ObjectStore) -> Result<()> {
        self.admin.delete_store(&ctx.namespace, store).await
    }
}
