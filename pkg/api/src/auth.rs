use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::AppState;

/// Identity of the caller, taken from the configured user-id header with
/// the configured prefix removed. Empty when the header is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller(pub String);

impl Caller {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Middleware: resolves the caller identity and injects it into the request
/// extensions. Authorization itself happens per operation.
pub async fn caller_identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = state.access.config().userid_header.as_str();
    let caller = req
        .headers()
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|value| state.access.caller_identity(value))
        .unwrap_or_default();

    debug!("Request {} {} from {:?}", req.method(), req.uri().path(), caller);
    req.extensions_mut().insert(Caller(caller));
    next.run(req).await
}
