//! Network-related constants.

/// Default port for the access management API.
pub const DEFAULT_API_PORT: u16 = 8081;

/// Default base path the API routes are mounted under.
pub const DEFAULT_BASE_PATH: &str = "/kfam";
