use chrono::{DateTime, Utc};
use pkg_constants::resources::API_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata shared by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Opaque version used for optimistic concurrency.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn add_label(&mut self, key: &str, value: impl Into<String>) {
        self.labels.insert(key.to_string(), value.into());
    }

    pub fn has_label(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }

    pub fn add_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.annotations.insert(key.to_string(), value.into());
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    pub fn is_controlled_by(&self, uid: &str) -> bool {
        self.controller().is_some_and(|r| r.uid == uid)
    }

    /// True when every `selector` pair is present in the labels.
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|have| have == v))
    }
}

/// Link from a derived object to the entity responsible for its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{kind} {name} is already controlled by {owner_kind} {owner_name}")]
pub struct AlreadyOwned {
    pub kind: &'static str,
    pub name: String,
    pub owner_kind: String,
    pub owner_name: String,
}

/// Record `owner` as the controller of `obj`.
///
/// Replaces a stale reference to the same owner, but refuses to take over an
/// object another owner already controls.
pub fn set_controller_reference<O: Resource, T: Resource>(
    owner: &O,
    obj: &mut T,
) -> Result<(), AlreadyOwned> {
    let owner_meta = owner.meta();
    if let Some(existing) = obj.meta().controller() {
        if existing.uid != owner_meta.uid {
            return Err(AlreadyOwned {
                kind: T::KIND,
                name: obj.meta().name.clone(),
                owner_kind: existing.kind.clone(),
                owner_name: existing.name.clone(),
            });
        }
    }
    let reference = OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: O::KIND.to_string(),
        name: owner_meta.name.clone(),
        uid: owner_meta.uid.clone(),
        controller: true,
        block_owner_deletion: true,
    };
    let refs = &mut obj.meta_mut().owner_references;
    refs.retain(|r| r.uid != reference.uid);
    refs.push(reference);
    Ok(())
}

/// Name of an object, optionally scoped to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A kind the registry can store.
pub trait Resource:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: &'static str;
    /// Path segment under `/registry/`.
    const PLURAL: &'static str;
    const NAMESPACED: bool;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        ObjectKey::from_meta(self.meta())
    }
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal, $plural:literal, $namespaced:literal) => {
        impl $crate::meta::Resource for $ty {
            const KIND: &'static str = $kind;
            const PLURAL: &'static str = $plural;
            const NAMESPACED: bool = $namespaced;

            fn meta(&self) -> &$crate::meta::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut $crate::meta::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

pub(crate) use impl_resource;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::profile::Profile;

    fn profile(name: &str, uid: &str) -> Profile {
        let mut p = Profile::default();
        p.metadata = ObjectMeta::cluster(name);
        p.metadata.uid = uid.to_string();
        p
    }

    #[test]
    fn sets_controller_reference() {
        let owner = profile("starlord", "uid-1");
        let mut ns = Namespace::new("starlord");
        set_controller_reference(&owner, &mut ns).unwrap();

        let controller = ns.metadata.controller().unwrap();
        assert_eq!(controller.kind, "Profile");
        assert_eq!(controller.name, "starlord");
        assert_eq!(controller.api_version, "kubeflow.org/v1alpha1");
        assert!(controller.block_owner_deletion);
        assert!(ns.metadata.is_controlled_by("uid-1"));

        // Setting it again does not duplicate the reference.
        set_controller_reference(&owner, &mut ns).unwrap();
        assert_eq!(ns.metadata.owner_references.len(), 1);
    }

    #[test]
    fn refuses_second_controller() {
        let mut ns = Namespace::new("starlord");
        set_controller_reference(&profile("starlord", "uid-1"), &mut ns).unwrap();
        let err = set_controller_reference(&profile("gamora", "uid-2"), &mut ns).unwrap_err();
        assert_eq!(err.owner_name, "starlord");
        assert!(ns.metadata.is_controlled_by("uid-1"));
    }

    #[test]
    fn label_selector_matching() {
        let mut meta = ObjectMeta::namespaced("ns", "a");
        meta.add_label("owner.kubeflow.org/id", "abc");
        meta.add_label("contributor.kubeflow.org/role", "edit");

        let mut selector = BTreeMap::new();
        assert!(meta.matches_labels(&selector));
        selector.insert("owner.kubeflow.org/id".to_string(), "abc".to_string());
        assert!(meta.matches_labels(&selector));
        selector.insert("contributor.kubeflow.org/role".to_string(), "admin".to_string());
        assert!(!meta.matches_labels(&selector));
    }

    #[test]
    fn object_key_display() {
        assert_eq!(ObjectKey::cluster("starlord").to_string(), "starlord");
        assert_eq!(
            ObjectKey::namespaced("starlord", "gamora").to_string(),
            "starlord/gamora"
        );
    }
}
