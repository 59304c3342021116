//! Mapping pipeline outcomes to HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use backfeed_core::RejectReason;
use backfeed_shared::BackfeedError;
use serde_json::json;

/// Error type for HTTP handlers. Every variant renders as `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The pipeline refused the mention; the reason goes back to the sender.
    #[error(transparent)]
    Rejected(#[from] RejectReason),

    /// The request itself was unusable.
    #[error("{0}")]
    BadRequest(String),

    /// Storage or other internal failure.
    #[error(transparent)]
    Internal(#[from] BackfeedError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Rejected(reason) => (StatusCode::BAD_REQUEST, reason.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
