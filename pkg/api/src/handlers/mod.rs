pub mod admins;
pub mod bindings;
pub mod error;
pub mod profiles;

use axum::Json;
use axum::extract::rejection::JsonRejection;

use crate::access::AccessError;

/// Unwrap a JSON body, reporting every rejection as a bad request.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AccessError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AccessError::BadRequest(rejection.body_text()))
}
