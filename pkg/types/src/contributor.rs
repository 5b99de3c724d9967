use pkg_constants::auth::{SEMANTIC_ROLE_ADMIN, SEMANTIC_ROLE_EDIT};
use pkg_constants::labels::{LABEL_CONTRIBUTOR_ROLE, LABEL_OWNER_ID};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity;
use crate::meta::{ObjectMeta, impl_resource};

/// A user with access to one profile namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub metadata: ObjectMeta,
    pub spec: ContributorSpec,
}

impl_resource!(Contributor, "Contributor", "contributors", true);

impl Contributor {
    /// Build a contributor for `user` in `namespace`, named after the local
    /// part of the identity and labeled for lookup by identity hash and role.
    pub fn for_user(namespace: &str, user: &str, role: ContributorRole) -> Self {
        let mut metadata = ObjectMeta::namespaced(namespace, identity::local_name(user));
        metadata.add_label(LABEL_OWNER_ID, identity::hash(user));
        metadata.add_label(LABEL_CONTRIBUTOR_ROLE, role.semantic_role());
        Self {
            metadata,
            spec: ContributorSpec {
                name: user.to_string(),
                role,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorSpec {
    /// Full user identity, e.g. `starlord@guardians.net`.
    pub name: String,
    pub role: ContributorRole,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContributorRole {
    Owner,
    #[default]
    Contributor,
}

impl ContributorRole {
    /// Role name exposed to access API consumers.
    pub fn semantic_role(self) -> &'static str {
        match self {
            ContributorRole::Owner => SEMANTIC_ROLE_ADMIN,
            ContributorRole::Contributor => SEMANTIC_ROLE_EDIT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContributorRole::Owner => "Owner",
            ContributorRole::Contributor => "Contributor",
        }
    }
}

impl fmt::Display for ContributorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
