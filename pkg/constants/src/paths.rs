//! Filesystem path constants.

/// Default config file path.
pub const DEFAULT_CONFIG: &str = "/etc/profile-manager/config.yaml";

/// Default data directory for the state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/profile-manager-data";
