use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, impl_resource};

/// A tenant namespace. Cluster scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self {
            metadata: ObjectMeta::cluster(name),
        }
    }
}

impl_resource!(Namespace, "Namespace", "namespaces", false);
