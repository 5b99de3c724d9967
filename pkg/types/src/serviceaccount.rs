use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, impl_resource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub metadata: ObjectMeta,
}

impl ServiceAccount {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
        }
    }
}

impl_resource!(ServiceAccount, "ServiceAccount", "serviceaccounts", true);
