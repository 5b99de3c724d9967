use serde::{Deserialize, Serialize};

use crate::rbac::{RoleRef, Subject};

/// Access API transfer object: one grant of a user to a namespace.
///
/// Never stored; translated to and from `Contributor` objects. The field
/// names follow the wire format existing dashboard clients send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Subject>,
    #[serde(default, rename = "referredNamespace")]
    pub referred_namespace: String,
    #[serde(default, rename = "RoleRef", skip_serializing_if = "Option::is_none")]
    pub role_ref: Option<RoleRef>,
    /// One of Succeeded, Failed, Unknown.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}
