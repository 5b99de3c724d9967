use chrono::Utc;
use pkg_constants::state::REGISTRY_PREFIX;
use pkg_types::meta::{ObjectKey, ObjectMeta, Resource};
use pkg_types::namespace::Namespace;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::StateStore;
use crate::error::{StoreError, StoreResult};
use crate::watch::{EventLog, EventType};

/// Filter for `list` and `delete_all_of`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Restrict namespaced kinds to one namespace.
    pub namespace: Option<String>,
    /// Equality label selector; every pair must match.
    pub labels: BTreeMap<String, String>,
}

impl ListParams {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            labels: BTreeMap::new(),
        }
    }

    pub fn label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }
}

/// Typed object store over `StateStore`.
///
/// Writes are serialized through one lock so every read-check-write is
/// atomic: `update` only succeeds against the resource version the caller
/// read, otherwise it fails with `Conflict` and the caller retries.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
    events: EventLog,
    write_lock: Arc<Mutex<()>>,
}

#[derive(Deserialize)]
struct StoredMeta {
    #[serde(default)]
    metadata: ObjectMeta,
}

fn stored_meta(bytes: &[u8]) -> Option<ObjectMeta> {
    serde_json::from_slice::<StoredMeta>(bytes)
        .ok()
        .map(|s| s.metadata)
}

impl Registry {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            events: EventLog::new(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Registry over an in-memory SlateDB. Used by tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(StateStore::in_memory().await?))
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub async fn close(self) -> anyhow::Result<()> {
        self.store.close().await
    }

    /// `/registry/<plural>/<name>` or `/registry/<plural>/<namespace>/<name>`.
    pub fn storage_key<T: Resource>(key: &ObjectKey) -> StoreResult<String> {
        if key.name.is_empty() {
            return Err(StoreError::Invalid {
                kind: T::KIND,
                reason: "name must not be empty".to_string(),
            });
        }
        let has_slash = |s: &str| s.contains('/');
        if has_slash(&key.name) || key.namespace.as_deref().is_some_and(has_slash) {
            return Err(StoreError::Invalid {
                kind: T::KIND,
                reason: format!("{} must not contain '/'", key),
            });
        }
        match (T::NAMESPACED, key.namespace.as_deref()) {
            (true, Some(ns)) if !ns.is_empty() => Ok(format!(
                "{}{}/{}/{}",
                REGISTRY_PREFIX,
                T::PLURAL,
                ns,
                key.name
            )),
            (true, _) => Err(StoreError::Invalid {
                kind: T::KIND,
                reason: format!("{} requires a namespace", key.name),
            }),
            (false, None) => Ok(format!("{}{}/{}", REGISTRY_PREFIX, T::PLURAL, key.name)),
            (false, Some(_)) => Err(StoreError::Invalid {
                kind: T::KIND,
                reason: format!("{} is cluster scoped and takes no namespace", key.name),
            }),
        }
    }

    fn list_prefix<T: Resource>(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if T::NAMESPACED => format!("{}{}/{}/", REGISTRY_PREFIX, T::PLURAL, ns),
            _ => format!("{}{}/", REGISTRY_PREFIX, T::PLURAL),
        }
    }

    fn decode<T: Resource>(key: &str, bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    fn encode<T: Resource>(key: &str, obj: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(obj).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    pub async fn get<T: Resource>(&self, key: &ObjectKey) -> StoreResult<T> {
        let storage_key = Self::storage_key::<T>(key)?;
        match self.store.get(&storage_key).await? {
            Some(bytes) => Self::decode(&storage_key, &bytes),
            None => Err(StoreError::NotFound {
                kind: T::KIND,
                key: key.to_string(),
            }),
        }
    }

    /// Objects of kind `T` matching `params`, in key order.
    pub async fn list<T: Resource>(&self, params: &ListParams) -> StoreResult<Vec<T>> {
        let prefix = Self::list_prefix::<T>(params.namespace.as_deref());
        let entries = self.store.list_prefix(&prefix).await?;
        let mut items = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<T>(&value) {
                Ok(obj) if obj.meta().matches_labels(&params.labels) => items.push(obj),
                Ok(_) => {}
                Err(e) => warn!("Skipping undecodable {} at {}: {}", T::KIND, key, e),
            }
        }
        Ok(items)
    }

    /// Store a new object, assigning its uid, resource version and creation time.
    pub async fn create<T: Resource>(&self, mut obj: T) -> StoreResult<T> {
        let key = obj.key();
        let storage_key = Self::storage_key::<T>(&key)?;

        let _guard = self.write_lock.lock().await;
        if self.store.get(&storage_key).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: T::KIND,
                key: key.to_string(),
            });
        }

        let meta = obj.meta_mut();
        meta.uid = Uuid::new_v4().to_string();
        meta.resource_version = "1".to_string();
        meta.creation_timestamp = Some(Utc::now());

        let data = Self::encode(&storage_key, &obj)?;
        self.store.put(&storage_key, &data).await?;
        self.events.emit(EventType::Put, storage_key, Some(data));
        debug!("Created {} {}", T::KIND, key);
        Ok(obj)
    }

    /// Replace a stored object. `obj` must carry the resource version it was read at.
    pub async fn update<T: Resource>(&self, mut obj: T) -> StoreResult<T> {
        let key = obj.key();
        let storage_key = Self::storage_key::<T>(&key)?;

        let _guard = self.write_lock.lock().await;
        let Some(bytes) = self.store.get(&storage_key).await? else {
            return Err(StoreError::NotFound {
                kind: T::KIND,
                key: key.to_string(),
            });
        };
        let stored = stored_meta(&bytes).unwrap_or_default();
        if obj.meta().resource_version != stored.resource_version {
            return Err(StoreError::Conflict {
                kind: T::KIND,
                key: key.to_string(),
                expected: obj.meta().resource_version.clone(),
                actual: stored.resource_version,
            });
        }

        let next = stored.resource_version.parse::<u64>().unwrap_or(0) + 1;
        let meta = obj.meta_mut();
        meta.uid = stored.uid;
        meta.creation_timestamp = stored.creation_timestamp;
        meta.resource_version = next.to_string();

        let data = Self::encode(&storage_key, &obj)?;
        self.store.put(&storage_key, &data).await?;
        self.events.emit(EventType::Put, storage_key, Some(data));
        debug!("Updated {} {} (resource version {})", T::KIND, key, next);
        Ok(obj)
    }

    /// Delete an object and, transitively, everything it owns. Deleting a
    /// namespace also deletes every object stored in it.
    pub async fn delete<T: Resource>(&self, key: &ObjectKey) -> StoreResult<()> {
        let storage_key = Self::storage_key::<T>(key)?;

        let _guard = self.write_lock.lock().await;
        let Some(bytes) = self.store.get(&storage_key).await? else {
            return Err(StoreError::NotFound {
                kind: T::KIND,
                key: key.to_string(),
            });
        };
        self.delete_cascading(vec![(storage_key, bytes)]).await
    }

    /// Delete every object of kind `T` matching `params`. Returns how many matched.
    pub async fn delete_all_of<T: Resource>(&self, params: &ListParams) -> StoreResult<usize> {
        let prefix = Self::list_prefix::<T>(params.namespace.as_deref());

        let _guard = self.write_lock.lock().await;
        let roots: Vec<_> = self
            .store
            .list_prefix(&prefix)
            .await?
            .into_iter()
            .filter(|(_, value)| {
                serde_json::from_slice::<T>(value)
                    .is_ok_and(|obj| obj.meta().matches_labels(&params.labels))
            })
            .collect();
        let deleted = roots.len();
        self.delete_cascading(roots).await?;
        Ok(deleted)
    }

    /// Caller must hold the write lock.
    async fn delete_cascading(&self, roots: Vec<(String, Vec<u8>)>) -> StoreResult<()> {
        if roots.is_empty() {
            return Ok(());
        }
        let dependents = Dependents::build(self.store.list_prefix(REGISTRY_PREFIX).await?);
        let mut visited = HashSet::new();
        let mut pending = roots;

        while let Some((key, value)) = pending.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            self.store.delete(&key).await?;
            let uid = stored_meta(&value)
                .map(|m| m.uid)
                .filter(|uid| !uid.is_empty());
            self.events.emit(EventType::Delete, key.clone(), Some(value));
            debug!("Deleted {}", key);

            for (dep_key, dep_value) in dependents.of(&key, uid.as_deref()) {
                if !visited.contains(dep_key) {
                    pending.push((dep_key.clone(), dep_value.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Snapshot of the store indexed by owner uid and by namespace.
struct Dependents {
    entries: Vec<(String, Vec<u8>)>,
    by_owner: HashMap<String, Vec<usize>>,
    by_namespace: HashMap<String, Vec<usize>>,
}

impl Dependents {
    fn build(entries: Vec<(String, Vec<u8>)>) -> Self {
        let mut by_owner: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_namespace: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, (key, value)) in entries.iter().enumerate() {
            if let Some(meta) = stored_meta(value) {
                for owner in meta.owner_references {
                    by_owner.entry(owner.uid).or_default().push(i);
                }
            }
            if let Some(namespace) = stored_namespace(key) {
                by_namespace
                    .entry(namespace.to_string())
                    .or_default()
                    .push(i);
            }
        }
        Self {
            entries,
            by_owner,
            by_namespace,
        }
    }

    /// Entries owned by `uid` plus, when `key` is a namespace, everything stored in it.
    fn of(&self, key: &str, uid: Option<&str>) -> Vec<&(String, Vec<u8>)> {
        let owned = uid.and_then(|uid| self.by_owner.get(uid));
        let contained = namespace_name(key).and_then(|ns| self.by_namespace.get(ns));
        owned
            .into_iter()
            .chain(contained)
            .flatten()
            .map(|&i| &self.entries[i])
            .collect()
    }
}

/// Namespace segment of a namespaced storage key.
fn stored_namespace(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(REGISTRY_PREFIX)?;
    match rest.split('/').collect::<Vec<_>>()[..] {
        [_, namespace, _] => Some(namespace),
        _ => None,
    }
}

/// Name of the namespace stored under `key`, if it is one.
fn namespace_name(key: &str) -> Option<&str> {
    key.strip_prefix(REGISTRY_PREFIX)?
        .strip_prefix(Namespace::PLURAL)?
        .strip_prefix('/')
        .filter(|name| !name.contains('/'))
}
