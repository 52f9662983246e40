//! Storage Daemon Admin Client
//!
//! Thin HTTP client for the storage daemon's admin endpoint. One endpoint
//! serves each cluster; its URL is derived from a template containing a
//! `{namespace}` placeholder.

use crate::crd::{ObjectStore, SanitizeMethod, StorageCluster};
use crate::domain::ports::{ClusterHealth, EndpointProber, MultisiteChain};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default admin endpoint template
pub const DEFAULT_ADMIN_ENDPOINT: &str = "http://storage-admin.{namespace}.svc:7000";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// URL template, `{namespace}` is replaced by the cluster namespace
    pub endpoint_template: String,
    pub timeout: Duration,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            endpoint_template: DEFAULT_ADMIN_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrchestrateRequest<'a> {
    name: String,
    image: &'a str,
    data_dir_host_path: &'a str,
    use_all_nodes: bool,
    nodes: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WipeRequest<'a> {
    data_dir_host_path: &'a str,
    sanitize_disks: SanitizeMethod,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    healthy: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolRequest<'a> {
    name: String,
    replicated_size: u32,
    failure_domain: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MultisiteRequest<'a> {
    store: String,
    realm: &'a str,
    zone_group: &'a str,
    zone: &'a str,
    endpoint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreRequest<'a> {
    realm: &'a str,
    zone_group: &'a str,
    zone: &'a str,
    instances: u32,
    port: Option<u16>,
}

// =============================================================================
// Admin Client
// =============================================================================

#[derive(Debug, Clone)]
pub struct AdminClient {
    config: AdminConfig,
    client: reqwest::Client,
}

impl AdminClient {
    pub fn new(config: AdminConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Admin endpoint of the cluster in `namespace`
    pub fn endpoint(&self, namespace: &str) -> String {
        self.config
            .endpoint_template
            .replace("{namespace}", namespace)
            .trim_end_matches('/')
            .to_string()
    }

    fn url(&self, namespace: &str, path: &str) -> String {
        format!("{}/api/v1/{}", self.endpoint(namespace), path)
    }

    async fn send(&self, namespace: &str, operation: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        debug!(namespace = %namespace, operation = %operation, "Calling storage daemon");
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                Error::DaemonUnavailable {
                    endpoint: self.endpoint(namespace),
                }
            } else {
                Error::Http(e)
            }
        })?;
        Ok(response)
    }

    async fn expect_success(operation: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::DaemonOperationFailed {
            operation: operation.to_string(),
            reason: format!("{}: {}", status, body.trim()),
        })
    }

    /// Like `expect_success`, but a 404 means the daemon has not applied the zone yet
    async fn expect_zone(operation: &str, response: reqwest::Response, zone: &str) -> Result<reqwest::Response> {
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::ResourceNotFound {
                kind: "zone".to_string(),
                name: zone.to_string(),
            });
        }
        Self::expect_success(operation, response).await
    }

    pub async fn orchestrate(&self, cluster: &StorageCluster) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let body = OrchestrateRequest {
            name: cluster.name_any(),
            image: &cluster.spec.version.image,
            data_dir_host_path: &cluster.spec.data_dir_host_path,
            use_all_nodes: cluster.spec.storage.use_all_nodes,
            nodes: &cluster.spec.storage.nodes,
        };
        let request = self.client.post(self.url(&namespace, "cluster/orchestrate")).json(&body);
        let response = self.send(&namespace, "orchestrate", request).await?;
        Self::expect_success("orchestrate", response).await?;
        Ok(())
    }

    pub async fn health(&self, namespace: &str) -> Result<ClusterHealth> {
        let request = self.client.get(self.url(namespace, "cluster/health"));
        let response = self.send(namespace, "health", request).await?;
        let health: HealthResponse = Self::expect_success("health", response).await?.json().await?;
        Ok(ClusterHealth {
            healthy: health.healthy,
            message: health.message,
        })
    }

    pub async fn version(&self, namespace: &str) -> Result<String> {
        let request = self.client.get(self.url(namespace, "cluster/version"));
        let response = self.send(namespace, "version", request).await?;
        let version: VersionResponse = Self::expect_success("version", response).await?.json().await?;
        Ok(version.version)
    }

    pub async fn wipe(&self, cluster: &StorageCluster) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let body = WipeRequest {
            data_dir_host_path: &cluster.spec.data_dir_host_path,
            sanitize_disks: cluster.spec.cleanup_policy.sanitize_disks,
        };
        let request = self.client.post(self.url(&namespace, "cluster/wipe")).json(&body);
        let response = self.send(&namespace, "wipe", request).await?;
        Self::expect_success("wipe", response).await?;
        Ok(())
    }

    pub async fn zone_exists(&self, namespace: &str, zone: &str) -> Result<bool> {
        let request = self.client.get(self.url(namespace, &format!("zones/{}", zone)));
        let response = self.send(namespace, "get zone", request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::expect_success("get zone", response).await?;
        Ok(true)
    }

    pub async fn create_pools(&self, namespace: &str, store: &ObjectStore) -> Result<()> {
        let name = store.name_any();
        for (suffix, spec) in [("meta", &store.spec.metadata_pool), ("data", &store.spec.data_pool)] {
            let body = PoolRequest {
                name: format!("{}.{}", name, suffix),
                replicated_size: spec.replicated_size,
                failure_domain: &spec.failure_domain,
            };
            let request = self.client.post(self.url(namespace, "pools")).json(&body);
            let response = self.send(namespace, "create pool", request).await?;
            Self::expect_success("create pool", response).await?;
        }
        Ok(())
    }

    pub async fn configure_multisite(
        &self,
        namespace: &str,
        store: &ObjectStore,
        service_ip: &str,
        chain: &MultisiteChain,
    ) -> Result<()> {
        let port = store.gateway_port().unwrap_or(80);
        let body = MultisiteRequest {
            store: store.name_any(),
            realm: &chain.realm,
            zone_group: &chain.zone_group,
            zone: &chain.zone,
            endpoint: format!("http://{}:{}", service_ip, port),
        };
        let request = self.client.post(self.url(namespace, "multisite")).json(&body);
        let response = self.send(namespace, "configure multisite", request).await?;
        Self::expect_zone("configure multisite", response, &chain.zone).await?;
        Ok(())
    }

    pub async fn put_store(&self, namespace: &str, store: &ObjectStore, chain: &MultisiteChain) -> Result<()> {
        let body = StoreRequest {
            realm: &chain.realm,
            zone_group: &chain.zone_group,
            zone: &chain.zone,
            instances: store.spec.gateway.instances,
            port: store.gateway_port(),
        };
        let path = format!("stores/{}", store.name_any());
        let request = self.client.put(self.url(namespace, &path)).json(&body);
        let response = self.send(namespace, "update store", request).await?;
        Self::expect_zone("update store", response, &chain.zone).await?;
        Ok(())
    }

    pub async fn delete_store(&self, namespace: &str, store: &ObjectStore) -> Result<()> {
        let path = format!(
            "stores/{}?preservePools={}",
            store.name_any(),
            store.spec.preserve_pools_on_delete
        );
        let request = self.client.delete(self.url(namespace, &path));
        let response = self.send(namespace, "delete store", request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success("delete store", response).await?;
        Ok(())
    }
}

// =============================================================================
// Endpoint Prober
// =============================================================================

/// Probes gateway endpoints with a plain GET
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EndpointProber for HttpProber {
    async fn probe(&self, url: &str) -> Result<()> {
        let response = self.client.get(url).send().await.map_err(|e| Error::DaemonOperationFailed {
            operation: "probe".to_string(),
            reason: format!("{}: {}", url, e),
        })?;
        // Any HTTP answer below 500 means the gateway is serving
        if response.status().is_server_error() {
            return Err(Error::DaemonOperationFailed {
                operation: "probe".to_string(),
                reason: format!("{} returned {}", url, response.status()),
            });
        }
        Ok(())
    }
}
