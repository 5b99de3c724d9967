//! Stable label and annotation keys used for cross-resource lookup.

/// Identity hash of the user a resource belongs to.
pub const LABEL_OWNER_ID: &str = "owner.kubeflow.org/id";

/// Semantic role ("admin" / "edit") of a contributor.
pub const LABEL_CONTRIBUTOR_ROLE: &str = "contributor.kubeflow.org/role";

/// Marks resources managed on behalf of a profile.
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const PART_OF_PROFILE: &str = "kubeflow-profile";

/// Workload visibility; `public` workloads are reachable by every contributor.
pub const LABEL_VISIBILITY: &str = "kubeflow.org/visibility";
pub const VISIBILITY_PUBLIC: &str = "public";

/// Namespace labels contributed by feature flags.
pub const LABEL_ISTIO_INJECTION: &str = "istio-injection";
pub const LABEL_PIPELINES_ENABLED: &str = "pipelines.kubeflow.org/enabled";

/// Raw user identity.
pub const ANNOTATION_OWNER_NAME: &str = "owner.kubeflow.org/name";

/// Namespace owner, also read by older role-binding consumers.
pub const ANNOTATION_OWNER: &str = "owner";

/// Legacy contributor role annotation on role bindings.
pub const ANNOTATION_ROLE: &str = "role";
