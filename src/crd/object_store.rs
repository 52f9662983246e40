//! ObjectStore CRD
//!
//! An object gateway served by the StorageCluster of the same namespace.
//! A store may join a multisite configuration by naming an ObjectZone.

use super::common::{Condition, Phase};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// ObjectStore CRD
// =============================================================================

/// ObjectStore declares an S3-compatible gateway and its pools.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "ObjectStore",
    plural = "objectstores",
    shortname = "os",
    status = "ObjectStoreStatus",
    namespaced,
    printcolumn = r#"{"name": "Zone", "type": "string", "jsonPath": ".spec.zone.name"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Health", "type": "string", "jsonPath": ".status.bucketStatus.health"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    /// Pool holding bucket indexes and metadata
    #[serde(default)]
    pub metadata_pool: PoolSpec,

    /// Pool holding object data
    #[serde(default)]
    pub data_pool: PoolSpec,

    /// Gateway settings
    #[serde(default)]
    pub gateway: GatewaySpec,

    /// Multisite zone this store belongs to
    #[serde(default)]
    pub zone: ZoneRef,

    /// Endpoint health checking
    #[serde(default)]
    pub health_check: HealthCheckSpec,

    /// Keep pools when the store is deleted
    #[serde(default)]
    pub preserve_pools_on_delete: bool,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Replicated pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    /// Number of replicas
    #[serde(default = "default_replica_size")]
    pub replicated_size: u32,

    /// Failure domain for replica placement
    #[serde(default = "default_failure_domain")]
    pub failure_domain: String,
}

impl Default for PoolSpec {
    fn default() -> Self {
        Self {
            replicated_size: default_replica_size(),
            failure_domain: default_failure_domain(),
        }
    }
}

/// Gateway settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Plain HTTP port (0 disables)
    #[serde(default)]
    pub port: u16,

    /// HTTPS port (0 disables)
    #[serde(default)]
    pub secure_port: u16,

    /// Number of gateway daemons
    #[serde(default)]
    pub instances: u32,

    /// Gateway addresses of an external cluster
    #[serde(default)]
    pub external_endpoints: Vec<String>,
}

/// Reference to an ObjectZone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRef {
    #[serde(default)]
    pub name: String,
}

/// Health checking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default)]
    pub bucket: BucketHealthCheck,
}

/// Periodic probe of the gateway endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketHealthCheck {
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between two probes
    #[serde(default = "default_probe_interval")]
    pub interval: u64,
}

impl Default for BucketHealthCheck {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_probe_interval(),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the ObjectStore
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreStatus {
    #[serde(default)]
    pub phase: Option<Phase>,

    #[serde(default)]
    pub message: Option<String>,

    /// Result of the last endpoint probe
    #[serde(default)]
    pub bucket_status: Option<BucketStatus>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Endpoint probe result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    pub health: BucketHealth,

    #[serde(default)]
    pub details: String,

    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BucketHealth {
    Connected,
    Failure,
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn default_replica_size() -> u32 {
    3
}

fn default_failure_domain() -> String {
    "host".to_string()
}

fn default_probe_interval() -> u64 {
    60
}

// =============================================================================
// Implementations
// =============================================================================

impl ObjectStore {
    /// Whether the store declares a multisite zone
    pub fn is_multisite(&self) -> bool {
        !self.spec.zone.name.is_empty()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// The port the gateway serves on, preferring plain HTTP
    pub fn gateway_port(&self) -> Option<u16> {
        match (self.spec.gateway.port, self.spec.gateway.secure_port) {
            (0, 0) => None,
            (0, secure) => Some(secure),
            (port, _) => Some(port),
        }
    }

    /// Name of the Service fronting the gateway
    pub fn service_name(&self) -> String {
        format!("gateway-{}", self.name_any())
    }

    /// Label selector matching ObjectBuckets provisioned against this store's namespace
    pub fn bucket_provisioner_selector(&self) -> String {
        let namespace = self.namespace().unwrap_or_default();
        format!("bucket-provisioner={}.{}-bucket", namespace, super::API_GROUP)
    }

    /// Check the spec for settings the gateway cannot run with
    pub fn validate(&self, external: bool) -> Result<()> {
        let name = self.name_any();
        if name.is_empty() {
            return Err(Error::MissingField("metadata.name".into()));
        }
        if self.namespace().unwrap_or_default().is_empty() {
            return Err(Error::MissingField("metadata.namespace".into()));
        }
        if self.gateway_port().is_none() {
            return Err(Error::Validation(format!(
                "object store {} must set gateway.port or gateway.securePort",
                name
            )));
        }
        if external {
            if self.spec.gateway.external_endpoints.is_empty() {
                return Err(Error::Validation(format!(
                    "object store {} on an external cluster needs gateway.externalEndpoints",
                    name
                )));
            }
            return Ok(());
        }
        if self.spec.gateway.instances == 0 {
            return Err(Error::Validation(format!(
                "object store {} needs at least one gateway instance",
                name
            )));
        }
        for (pool, spec) in [("metadataPool", &self.spec.metadata_pool), ("dataPool", &self.spec.data_pool)] {
            if spec.replicated_size == 0 {
                return Err(Error::Validation(format!(
                    "object store {}: {}.replicatedSize must be positive",
                    name, pool
                )));
            }
        }
        Ok(())
    }
}
