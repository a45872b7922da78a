//! HTTP error surface.
//!
//! Maps the core error taxonomy onto status codes. Duplicate deliveries and
//! resolution no-ops never reach this module; they are successful responses
//! with a distinguishing flag.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use leadledger_billing::BillingError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            BillingError::Unauthorized => {
                tracing::warn!("Rejected request with bad shared secret");
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
            }
            BillingError::OrgNotFound(portal_key) => (
                StatusCode::NOT_FOUND,
                format!("unknown portal key: {portal_key}"),
            ),
            BillingError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            BillingError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
