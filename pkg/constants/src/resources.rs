//! Fixed names and API groups of managed resources.

/// API version recorded in controller references.
pub const API_VERSION: &str = "kubeflow.org/v1alpha1";

/// API group of role bindings and cluster roles.
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

pub const CLUSTER_ROLE_KIND: &str = "ClusterRole";

/// Name of the resource quota maintained in every profile namespace.
pub const RESOURCE_QUOTA_NAME: &str = "kf-resource-quota";

/// Name of the profile-wide authorization policy.
pub const CONTROL_PLANE_POLICY_NAME: &str = "control-plane-access";

/// Suffixes of the per-contributor authorization policies.
pub const PUBLIC_POLICY_SUFFIX: &str = "public";
pub const PRIVATE_POLICY_SUFFIX: &str = "private";

/// Paths every workload exposes to probes regardless of caller.
pub const PROBE_PATHS: &[&str] = &["/healthz", "/metrics", "/wait-for-drain"];

/// Kernel API path the notebook controller may call.
pub const KERNEL_API_PATH: &str = "*/api/kernels";

/// Profile status condition type.
pub const CONDITION_READY: &str = "Ready";
