use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use interbrain_core::InterbrainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] InterbrainError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Core(e) => match e {
                InterbrainError::NodeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                InterbrainError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
                InterbrainError::MergeConflict { .. } => StatusCode::CONFLICT,
                InterbrainError::PartialCompositionFailure { .. } => StatusCode::CONFLICT,
                InterbrainError::LedgerCorruption { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                InterbrainError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                InterbrainError::NotFound(_) => StatusCode::NOT_FOUND,
                InterbrainError::InvalidInput(_)
                | InterbrainError::ShareLink(_)
                | InterbrainError::Descriptor(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = serde_json::json!({ "error": message });
        if let ServerError::Core(InterbrainError::MergeConflict { files }) = &self {
            body["files"] = serde_json::json!(files);
        }

        (status, axum::Json(body)).into_response()
    }
}
