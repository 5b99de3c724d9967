use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::access::AccessError;

pub fn status_code(err: &AccessError) -> StatusCode {
    match err {
        AccessError::BadRequest(_) => StatusCode::BAD_REQUEST,
        AccessError::Forbidden { .. } => StatusCode::FORBIDDEN,
        AccessError::NotFound(_) => StatusCode::NOT_FOUND,
        AccessError::Conflict(_) => StatusCode::CONFLICT,
        AccessError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        match &self {
            AccessError::Internal(e) => warn!("Access API request failed: {:#}", e),
            other => debug!("Access API request rejected ({}): {}", status, other),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
