//! Multisite Dependency Resolver
//!
//! Walks ObjectStore -> ObjectZone -> ObjectZoneGroup -> ObjectRealm. A
//! missing link is not an error: the caller waits and retries.

use crate::crd::ObjectStore;
use crate::domain::ports::{MultisiteApiRef, MultisiteChain};
use crate::error::{Result, ResultExt};
use kube::ResourceExt;
use tracing::debug;

/// Outcome of resolving a store's naming chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(MultisiteChain),
    /// A link in the chain does not exist yet
    Waiting { kind: &'static str, name: String },
}

pub struct MultisiteResolver {
    api: MultisiteApiRef,
}

impl MultisiteResolver {
    pub fn new(api: MultisiteApiRef) -> Self {
        Self { api }
    }

    pub async fn resolve(&self, store: &ObjectStore) -> Result<Resolution> {
        let store_name = store.name_any();
        if !store.is_multisite() {
            return Ok(Resolution::Resolved(MultisiteChain::single_site(&store_name)));
        }

        let namespace = store.namespace().unwrap_or_default();
        let zone_name = &store.spec.zone.name;

        let Some(zone) = self
            .api
            .get_zone(&namespace, zone_name)
            .await
            .with_context(|| format!("failed to get object zone {:?}", zone_name))?
        else {
            return Ok(waiting("ObjectZone", zone_name));
        };

        let group_name = &zone.spec.zone_group;
        let Some(group) = self
            .api
            .get_zone_group(&namespace, group_name)
            .await
            .with_context(|| format!("failed to get object zone group {:?}", group_name))?
        else {
            return Ok(waiting("ObjectZoneGroup", group_name));
        };

        let realm_name = &group.spec.realm;
        if self
            .api
            .get_realm(&namespace, realm_name)
            .await
            .with_context(|| format!("failed to get object realm {:?}", realm_name))?
            .is_none()
        {
            return Ok(waiting("ObjectRealm", realm_name));
        }

        let chain = MultisiteChain::new(realm_name.clone(), group_name.clone(), zone_name.clone());
        debug!(store = %store_name, ?chain, "Resolved multisite chain");
        Ok(Resolution::Resolved(chain))
    }
}

fn waiting(kind: &'static str, name: &str) -> Resolution {
    Resolution::Waiting {
        kind,
        name: name.to_string(),
    }
}
