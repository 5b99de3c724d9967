//! Access decisions for profile namespaces.
//!
//! The admin set of a namespace is the statically configured cluster admins,
//! the profile owner when it is a user, and every Owner-role contributor in
//! the namespace. Mutations other than profile creation require the caller to
//! be in that set, and contributors are only granted in namespaces their
//! profile actually controls. Every call reads the registry fresh.

use pkg_constants::labels::{LABEL_CONTRIBUTOR_ROLE, LABEL_OWNER_ID};
use pkg_constants::resources::CLUSTER_ROLE_KIND;
use pkg_state::{IgnoreNotFound, ListParams, Registry, StoreError};
use pkg_types::binding::Binding;
use pkg_types::config::ManagerConfig;
use pkg_types::contributor::{Contributor, ContributorRole};
use pkg_types::identity;
use pkg_types::meta::{ObjectKey, set_controller_reference};
use pkg_types::namespace::Namespace;
use pkg_types::profile::{Profile, ProfileStatus};
use pkg_types::rbac::{RoleRef, Subject};
use pkg_types::validate::{validate_name, validate_profile};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{caller:?} may not manage namespace {namespace}")]
    Forbidden { caller: String, namespace: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AccessError::NotFound(err.to_string()),
            StoreError::AlreadyExists { .. } => AccessError::Conflict(err.to_string()),
            StoreError::Invalid { .. } => AccessError::BadRequest(err.to_string()),
            other => AccessError::Internal(other.into()),
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

/// Optional filters for `read_bindings`; empty values are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindingFilter {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

pub struct AccessManager {
    registry: Registry,
    config: Arc<ManagerConfig>,
}

impl AccessManager {
    pub fn new(registry: Registry, config: Arc<ManagerConfig>) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Caller identity carried in a user-id header value.
    pub fn caller_identity(&self, header_value: &str) -> String {
        header_value
            .strip_prefix(self.config.userid_prefix.as_str())
            .unwrap_or(header_value)
            .to_string()
    }

    pub fn is_cluster_admin(&self, user: &str) -> bool {
        self.config.cluster_admins.contains(user)
    }

    pub async fn compute_admin_set(&self, namespace: &str) -> AccessResult<BTreeSet<String>> {
        let profile: Profile = self.registry.get(&ObjectKey::cluster(namespace)).await?;
        let contributors: Vec<Contributor> = self
            .registry
            .list(&ListParams::in_namespace(namespace))
            .await?;

        let mut admins = self.config.cluster_admins.clone();
        if profile.spec.owner.is_user() {
            admins.insert(profile.spec.owner.name);
        }
        admins.extend(
            contributors
                .into_iter()
                .filter(|c| c.spec.role == ContributorRole::Owner)
                .map(|c| c.spec.name),
        );
        Ok(admins)
    }

    pub async fn authorize(&self, caller: &str, namespace: &str) -> AccessResult<bool> {
        if caller.is_empty() {
            return Ok(false);
        }
        Ok(self.compute_admin_set(namespace).await?.contains(caller))
    }

    async fn require_admin(&self, caller: &str, namespace: &str) -> AccessResult<()> {
        if self.authorize(caller, namespace).await? {
            return Ok(());
        }
        warn!("Denied {:?} access to namespace {}", caller, namespace);
        Err(AccessError::Forbidden {
            caller: caller.to_string(),
            namespace: namespace.to_string(),
        })
    }

    pub async fn create_profile(&self, mut profile: Profile) -> AccessResult<Profile> {
        validate_profile(&profile).map_err(|e| AccessError::BadRequest(e.to_string()))?;
        profile.metadata.owner_references.clear();
        profile.status = ProfileStatus::default();

        let created = self.registry.create(profile).await?;
        info!(
            "Created profile {} for {}",
            created.metadata.name, created.spec.owner.name
        );
        Ok(created)
    }

    pub async fn remove_profile(&self, name: &str, caller: &str) -> AccessResult<()> {
        self.require_admin(caller, name).await?;
        self.registry
            .delete::<Profile>(&ObjectKey::cluster(name))
            .await
            .ignore_not_found()?;
        info!("Profile {} removed by {}", name, caller);
        Ok(())
    }

    /// Grant the binding's user the Contributor role in the referred namespace.
    pub async fn add_contributor(&self, binding: Binding, caller: &str) -> AccessResult<Contributor> {
        let (user, namespace) = Self::target(&binding)?;
        if !user.is_user() {
            return Err(AccessError::BadRequest(
                "only users can be added as contributors".to_string(),
            ));
        }
        validate_name(identity::local_name(&user.name)).map_err(|e| {
            AccessError::BadRequest(format!("cannot derive a contributor name: {}", e))
        })?;
        self.require_admin(caller, namespace).await?;

        // Only grant inside a namespace the profile actually controls.
        let profile: Profile = self.registry.get(&ObjectKey::cluster(namespace)).await?;
        let managed = self
            .registry
            .get::<Namespace>(&ObjectKey::cluster(namespace))
            .await
            .ignore_not_found()?
            .is_some_and(|ns| ns.metadata.is_controlled_by(&profile.metadata.uid));
        if !managed {
            warn!(
                "Refusing contributor {} in namespace {}: not managed by its profile",
                user.name, namespace
            );
            return Err(AccessError::Conflict(format!(
                "namespace {} is not managed by profile {}",
                namespace, namespace
            )));
        }

        let mut contributor =
            Contributor::for_user(namespace, &user.name, ContributorRole::Contributor);
        set_controller_reference(&profile, &mut contributor).map_err(anyhow::Error::from)?;
        let created = self.registry.create(contributor).await?;
        info!(
            "Added {} as contributor to {} (by {})",
            user.name, namespace, caller
        );
        Ok(created)
    }

    /// Revoke every contributor entry of the binding's user in the referred namespace.
    pub async fn remove_contributor(&self, binding: Binding, caller: &str) -> AccessResult<usize> {
        let (user, namespace) = Self::target(&binding)?;
        self.require_admin(caller, namespace).await?;

        let params =
            ListParams::in_namespace(namespace).label(LABEL_OWNER_ID, identity::hash(&user.name));
        let removed = self.registry.delete_all_of::<Contributor>(&params).await?;
        info!(
            "Removed {} from {} ({} entries, by {})",
            user.name, namespace, removed, caller
        );
        Ok(removed)
    }

    fn target(binding: &Binding) -> AccessResult<(&Subject, &str)> {
        let user = binding
            .user
            .as_ref()
            .filter(|u| !u.name.is_empty())
            .ok_or_else(|| AccessError::BadRequest("binding must name a user".to_string()))?;
        if binding.referred_namespace.is_empty() {
            return Err(AccessError::BadRequest(
                "binding must name a referredNamespace".to_string(),
            ));
        }
        Ok((user, binding.referred_namespace.as_str()))
    }

    /// Contributors matching `filter`, as bindings with their semantic role.
    pub async fn read_bindings(&self, filter: &BindingFilter) -> AccessResult<Vec<Binding>> {
        let set = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let mut params = ListParams {
            namespace: set(&filter.namespace),
            ..Default::default()
        };
        if let Some(user) = set(&filter.user) {
            params = params.label(LABEL_OWNER_ID, identity::hash(&user));
        }
        if let Some(role) = set(&filter.role) {
            params = params.label(LABEL_CONTRIBUTOR_ROLE, role);
        }

        let contributors: Vec<Contributor> = self.registry.list(&params).await?;
        Ok(contributors
            .into_iter()
            .map(|c| Binding {
                user: Some(Subject::user(c.spec.name)),
                referred_namespace: c.metadata.namespace.unwrap_or_default(),
                role_ref: Some(RoleRef {
                    api_group: String::new(),
                    kind: CLUSTER_ROLE_KIND.to_string(),
                    name: c.spec.role.semantic_role().to_string(),
                }),
                status: String::new(),
            })
            .collect())
    }
}
