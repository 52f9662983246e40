//! Multisite CRDs
//!
//! Object stores that replicate across sites name an ObjectZone. A zone
//! belongs to an ObjectZoneGroup, which belongs to an ObjectRealm.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ObjectRealm is the top of the multisite naming chain
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "ObjectRealm",
    plural = "objectrealms",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRealmSpec {
    /// Pull the realm from another site instead of creating it
    #[serde(default)]
    pub pull: Option<PullSpec>,
}

/// Remote realm to pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullSpec {
    pub endpoint: String,
}

/// ObjectZoneGroup groups zones inside a realm
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "ObjectZoneGroup",
    plural = "objectzonegroups",
    namespaced,
    printcolumn = r#"{"name": "Realm", "type": "string", "jsonPath": ".spec.realm"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectZoneGroupSpec {
    /// Name of the ObjectRealm
    pub realm: String,
}

/// ObjectZone is the unit an ObjectStore joins
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "ObjectZone",
    plural = "objectzones",
    namespaced,
    printcolumn = r#"{"name": "ZoneGroup", "type": "string", "jsonPath": ".spec.zoneGroup"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectZoneSpec {
    /// Name of the ObjectZoneGroup
    pub zone_group: String,
}
