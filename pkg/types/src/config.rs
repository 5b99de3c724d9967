use pkg_constants::auth::{DEFAULT_CONTRIBUTOR_CLUSTER_ROLE, DEFAULT_USERID_HEADER};
use pkg_constants::labels::{LABEL_ISTIO_INJECTION, LABEL_PIPELINES_ENABLED};
use pkg_constants::network::{DEFAULT_API_PORT, DEFAULT_BASE_PATH};
use pkg_constants::paths::DEFAULT_DATA_DIR;
use pkg_constants::state::{DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_WORKERS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::quota::ResourceQuotaSpec;

/// Manager configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 8081
/// data-dir: /var/lib/profile-manager
/// userid-header: kubeflow-userid
/// userid-prefix: "accounts.google.com:"
/// cluster-admins: [admin@example.com]
/// enable-istio: true
/// default-resource-quota:
///   hard:
///     requests.cpu: "8"
/// namespace-labels:
///   katib.kubeflow.org/metrics-collector-injection: enabled
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "base-path")]
    pub base_path: Option<String>,
    #[serde(default, alias = "userid-header")]
    pub userid_header: Option<String>,
    #[serde(default, alias = "userid-prefix")]
    pub userid_prefix: Option<String>,
    #[serde(default, alias = "cluster-admins")]
    pub cluster_admins: Option<Vec<String>>,
    #[serde(default, alias = "enable-istio")]
    pub enable_istio: Option<bool>,
    #[serde(default, alias = "enable-pipelines")]
    pub enable_pipelines: Option<bool>,
    #[serde(default, alias = "enable-namespace-adoption")]
    pub enable_namespace_adoption: Option<bool>,
    #[serde(default, alias = "default-resource-quota")]
    pub default_resource_quota: Option<ResourceQuotaSpec>,
    #[serde(default, alias = "namespace-labels")]
    pub namespace_labels: Option<BTreeMap<String, String>>,
    #[serde(default, alias = "contributor-cluster-role")]
    pub contributor_cluster_role: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default, alias = "resync-interval-secs")]
    pub resync_interval_secs: Option<u64>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Optional integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Maintain mesh authorization policies for profiles and contributors.
    pub network_policy: bool,
    /// Label profile namespaces for pipeline workloads.
    pub pipelines: bool,
    /// Allow a profile to take over a namespace that existed before it.
    pub namespace_adoption: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            network_policy: true,
            pipelines: false,
            namespace_adoption: false,
        }
    }
}

/// Resolved, immutable configuration shared by the controllers and the access API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub port: u16,
    pub data_dir: String,
    pub base_path: String,
    pub userid_header: String,
    pub userid_prefix: String,
    pub cluster_admins: BTreeSet<String>,
    pub features: Features,
    pub default_resource_quota: Option<ResourceQuotaSpec>,
    /// Labels explicitly configured for every profile namespace.
    pub namespace_labels: BTreeMap<String, String>,
    pub contributor_cluster_role: String,
    pub workers: usize,
    pub resync_interval_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_PORT,
            data_dir: DEFAULT_DATA_DIR.to_string(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            userid_header: DEFAULT_USERID_HEADER.to_string(),
            userid_prefix: String::new(),
            cluster_admins: BTreeSet::new(),
            features: Features::default(),
            default_resource_quota: None,
            namespace_labels: BTreeMap::new(),
            contributor_cluster_role: DEFAULT_CONTRIBUTOR_CLUSTER_ROLE.to_string(),
            workers: DEFAULT_WORKERS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
        }
    }
}

impl ManagerConfig {
    /// Apply every value set in `file` over the defaults.
    pub fn from_file(file: ManagerConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            port: file.port.unwrap_or(defaults.port),
            data_dir: file.data_dir.unwrap_or(defaults.data_dir),
            base_path: file.base_path.unwrap_or(defaults.base_path),
            userid_header: file.userid_header.unwrap_or(defaults.userid_header),
            userid_prefix: file.userid_prefix.unwrap_or(defaults.userid_prefix),
            cluster_admins: file
                .cluster_admins
                .map(|admins| admins.into_iter().collect())
                .unwrap_or(defaults.cluster_admins),
            features: Features {
                network_policy: file
                    .enable_istio
                    .unwrap_or(defaults.features.network_policy),
                pipelines: file.enable_pipelines.unwrap_or(defaults.features.pipelines),
                namespace_adoption: file
                    .enable_namespace_adoption
                    .unwrap_or(defaults.features.namespace_adoption),
            },
            default_resource_quota: file.default_resource_quota,
            namespace_labels: file.namespace_labels.unwrap_or_default(),
            contributor_cluster_role: file
                .contributor_cluster_role
                .unwrap_or(defaults.contributor_cluster_role),
            workers: file.workers.unwrap_or(defaults.workers).max(1),
            resync_interval_secs: file
                .resync_interval_secs
                .unwrap_or(defaults.resync_interval_secs),
        }
    }

    /// Labels every profile namespace should carry: feature labels first,
    /// explicitly configured labels win on the same key.
    pub fn effective_namespace_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        if self.features.network_policy {
            labels.insert(LABEL_ISTIO_INJECTION.to_string(), "true".to_string());
        }
        if self.features.pipelines {
            labels.insert(LABEL_PIPELINES_ENABLED.to_string(), "true".to_string());
        }
        labels.extend(self.namespace_labels.clone());
        labels
    }
}
