pub mod access;
pub mod auth;
pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;

use access::AccessManager;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub access: Arc<AccessManager>,
}
