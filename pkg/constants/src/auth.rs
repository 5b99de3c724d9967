//! Identity and principal constants.

/// Request header carrying the authenticated caller identity.
pub const DEFAULT_USERID_HEADER: &str = "kubeflow-userid";

/// Cluster role bound to every contributor unless configured otherwise.
pub const DEFAULT_CONTRIBUTOR_CLUSTER_ROLE: &str = "kubeflow-edit";

/// Subject kind for human users.
pub const USER_KIND: &str = "User";

/// Mesh principal of the ingress gateway.
pub const PRINCIPAL_INGRESS_GATEWAY: &str =
    "cluster.local/ns/istio-system/sa/istio-ingressgateway-service-account";

/// Mesh principal of the notebook controller, allowed to reach kernel endpoints.
pub const PRINCIPAL_NOTEBOOK_CONTROLLER: &str =
    "cluster.local/ns/kubeflow/sa/notebook-controller-service-account";

/// Semantic role reported for Owner contributors.
pub const SEMANTIC_ROLE_ADMIN: &str = "admin";

/// Semantic role reported for Contributor contributors.
pub const SEMANTIC_ROLE_EDIT: &str = "edit";
