use clap::Parser;
use pkg_api::AppState;
use pkg_api::access::AccessManager;
use pkg_api::server::serve;
use pkg_constants::paths::DEFAULT_CONFIG;
use pkg_controllers::{ContributorReconciler, Controller, ProfileReconciler};
use pkg_state::Registry;
use pkg_state::client::StateStore;
use pkg_types::config::{ManagerConfig, ManagerConfigFile, load_config_file};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "profile-manager",
    about = "Tenant profile controllers and access management API"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Port for the access management API
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Path the API routes are mounted under
    #[arg(long)]
    base_path: Option<String>,

    /// Request header carrying the caller identity
    #[arg(long)]
    userid_header: Option<String>,

    /// Prefix stripped from the identity header value
    #[arg(long)]
    userid_prefix: Option<String>,

    /// Cluster admin identity (repeatable); replaces the configured list
    #[arg(long = "cluster-admin")]
    cluster_admins: Vec<String>,

    /// Maintain mesh authorization policies
    #[arg(long)]
    enable_istio: Option<bool>,

    /// Label profile namespaces for pipelines
    #[arg(long)]
    enable_pipelines: Option<bool>,

    /// Let profiles take over namespaces they did not create
    #[arg(long)]
    enable_namespace_adoption: Option<bool>,

    /// Cluster role bound to every contributor
    #[arg(long)]
    contributor_cluster_role: Option<String>,

    /// Reconcile workers per controller
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds between full resyncs
    #[arg(long)]
    resync_interval_secs: Option<u64>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Merge: CLI args > config file > defaults.
    fn merge(&self, mut file: ManagerConfigFile) -> ManagerConfig {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field.clone() {
                    file.$field = Some(v);
                })*
            };
        }
        overlay!(
            port,
            data_dir,
            base_path,
            userid_header,
            userid_prefix,
            enable_istio,
            enable_pipelines,
            enable_namespace_adoption,
            contributor_cluster_role,
            workers,
            resync_interval_secs
        );
        if !self.cluster_admins.is_empty() {
            file.cluster_admins = Some(self.cluster_admins.clone());
        }
        ManagerConfig::from_file(file)
    }
}

fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: ManagerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);
    let config = Arc::new(cli.merge(file_cfg));

    info!("Starting profile-manager");
    info!("  Port:            {}", config.port);
    info!("  Data dir:        {}", config.data_dir);
    info!("  Base path:       {}", config.base_path);
    info!("  User-id header:  {}", config.userid_header);
    info!("  Cluster admins:  {}", config.cluster_admins.len());
    info!("  Features:        {:?}", config.features);

    let registry = Registry::new(StateStore::new(&config.data_dir).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controllers = vec![
        Controller::new(
            ProfileReconciler::new(registry.clone(), config.clone()),
            registry.events().clone(),
            &config,
        )
        .start(shutdown_rx.clone()),
        Controller::new(
            ContributorReconciler::new(registry.clone(), config.clone()),
            registry.events().clone(),
            &config,
        )
        .start(shutdown_rx.clone()),
    ];

    let state = AppState {
        access: Arc::new(AccessManager::new(registry.clone(), config.clone())),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let mut api_shutdown = shutdown_rx.clone();
    let mut api = tokio::spawn(serve(state, addr, async move {
        let _ = api_shutdown.changed().await;
    }));

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C, shutting down");
            None
        }
        result = &mut api => {
            warn!("Access API exited, shutting down");
            Some(result)
        }
    };

    // Receivers may already be gone.
    let _ = shutdown_tx.send(true);
    for handle in controllers {
        handle.await?;
    }
    let api_result = match finished {
        Some(result) => result,
        None => api.await,
    };
    registry.close().await?;
    api_result??;

    info!("profile-manager stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file() {
        let cli = Cli::parse_from([
            "profile-manager",
            "--port",
            "9090",
            "--cluster-admin",
            "root@example.com",
            "--enable-istio",
            "false",
        ]);
        let file = ManagerConfigFile {
            port: Some(8000),
            userid_prefix: Some("accounts.google.com:".into()),
            cluster_admins: Some(vec!["old@example.com".into()]),
            ..Default::default()
        };
        let config = cli.merge(file);
        assert_eq!(config.port, 9090);
        assert_eq!(config.userid_prefix, "accounts.google.com:");
        assert!(config.cluster_admins.contains("root@example.com"));
        assert!(!config.cluster_admins.contains("old@example.com"));
        assert!(!config.features.network_policy);
    }

    #[test]
    fn defaults_without_flags() {
        let cli = Cli::parse_from(["profile-manager"]);
        assert_eq!(cli.merge(ManagerConfigFile::default()), ManagerConfig::default());
    }
}
