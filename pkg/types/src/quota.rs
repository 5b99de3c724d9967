use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, impl_resource};

/// Hard limits keyed by resource name, e.g. `requests.cpu: "4"` or `configmaps: "10"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuotaSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hard: BTreeMap<String, String>,
}

impl ResourceQuotaSpec {
    pub fn is_empty(&self) -> bool {
        self.hard.is_empty()
    }
}

/// Resource quota for a profile namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourceQuotaSpec,
}

impl ResourceQuota {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: ResourceQuotaSpec::default(),
        }
    }
}

impl_resource!(ResourceQuota, "ResourceQuota", "resourcequotas", true);
