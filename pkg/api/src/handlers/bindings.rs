use axum::{
    Extension, Json,
    extract::{Query, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use pkg_types::binding::Binding;
use serde_json::json;

use super::json_body;
use crate::AppState;
use crate::access::BindingFilter;
use crate::auth::Caller;

pub async fn read_bindings(
    State(state): State<AppState>,
    Query(filter): Query<BindingFilter>,
) -> Response {
    match state.access.read_bindings(&filter).await {
        Ok(bindings) => Json(json!({ "bindings": bindings })).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn add_contributor(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<Binding>, JsonRejection>,
) -> Response {
    let binding = match json_body(payload) {
        Ok(binding) => binding,
        Err(e) => return e.into_response(),
    };
    match state.access.add_contributor(binding, caller.as_str()).await {
        Ok(_) => Json(json!({ "message": "Added Contributor" })).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn remove_contributor(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<Binding>, JsonRejection>,
) -> Response {
    let binding = match json_body(payload) {
        Ok(binding) => binding,
        Err(e) => return e.into_response(),
    };
    match state.access.remove_contributor(binding, caller.as_str()).await {
        Ok(_) => Json(json!({ "message": "Removed Contributor" })).into_response(),
        Err(e) => e.into_response(),
    }
}
