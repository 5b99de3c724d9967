use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pkg_types::profile::Profile;
use serde_json::json;

use super::json_body;
use crate::AppState;
use crate::auth::Caller;

pub async fn create_profile(
    State(state): State<AppState>,
    payload: Result<Json<Profile>, JsonRejection>,
) -> Response {
    let profile = match json_body(payload) {
        Ok(profile) => profile,
        Err(e) => return e.into_response(),
    };
    match state.access.create_profile(profile).await {
        Ok(created) => (StatusCode::OK, Json(created)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn remove_profile(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(name): Path<String>,
) -> Response {
    match state.access.remove_profile(&name, caller.as_str()).await {
        Ok(()) => Json(json!({ "message": "Removed Profile" })).into_response(),
        Err(e) => e.into_response(),
    }
}
