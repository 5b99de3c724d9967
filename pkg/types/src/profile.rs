use pkg_constants::resources::CONDITION_READY;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::meta::{ObjectMeta, impl_resource};
use crate::quota::ResourceQuotaSpec;
use crate::rbac::Subject;

/// One tenant. The profile name is also the name of the namespace it governs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ProfileSpec,
    #[serde(default)]
    pub status: ProfileStatus,
}

impl_resource!(Profile, "Profile", "profiles", false);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    #[serde(default)]
    pub owner: Subject,
    /// Applied to the profile namespace; overrides the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_quota_spec: Option<ResourceQuotaSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ProfileCondition>,
    /// Sorted, de-duplicated names of the contributors in the namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<LocalObjectReference>,
}

impl ProfileStatus {
    /// Insert or replace the condition with the same type. Returns true on change.
    pub fn set_condition(&mut self, condition: ProfileCondition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) if *existing == condition => false,
            Some(existing) => {
                *existing = condition;
                true
            }
            None => {
                self.conditions.push(condition);
                true
            }
        }
    }

    pub fn contributor_names(&self) -> Vec<&str> {
        self.contributors.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ProfileCondition {
    pub fn ready(status: ConditionStatus, message: impl Into<String>) -> Self {
        Self {
            type_: CONDITION_READY.to_string(),
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    Successful,
    Failed,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::Successful => write!(f, "Successful"),
            ConditionStatus::Failed => write!(f, "Failed"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}
