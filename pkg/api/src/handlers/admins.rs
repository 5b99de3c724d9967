use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::AppState;
use crate::access::AccessError;

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    #[serde(default)]
    pub user: Option<String>,
}

/// `GET /role/clusteradmin?user=` answers "true" or "false" against the
/// configured cluster admins only.
pub async fn is_cluster_admin(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> Response {
    match query.user.filter(|u| !u.is_empty()) {
        Some(user) => (
            StatusCode::OK,
            state.access.is_cluster_admin(&user).to_string(),
        )
            .into_response(),
        None => AccessError::BadRequest("missing required param 'user'".to_string()).into_response(),
    }
}
