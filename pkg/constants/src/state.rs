//! State store constants.

/// Prefix shared by every stored object key.
pub const REGISTRY_PREFIX: &str = "/registry/";

/// Capacity of the watch broadcast channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Default interval between full resyncs of a controller, in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Default number of concurrent reconcile workers per controller.
pub const DEFAULT_WORKERS: usize = 2;

/// Requeue backoff bounds after a failed pass, in milliseconds.
pub const REQUEUE_BACKOFF_BASE_MS: u64 = 500;
pub const REQUEUE_BACKOFF_MAX_MS: u64 = 60_000;
