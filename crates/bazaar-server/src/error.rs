use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use bazaar_chat::ChatError;
use bazaar_shared::error::IdError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Missing or invalid identity: {0}")]
    Unauthenticated(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded, retry in {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<IdError> for ServerError {
    fn from(e: IdError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("Worker task failed: {e}"))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Chat(e) => match e {
                ChatError::Unauthorized(_) => (StatusCode::FORBIDDEN, self.to_string()),
                ChatError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
                ChatError::ValidationFailed(_) => (StatusCode::BAD_REQUEST, self.to_string()),
                ChatError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
                ChatError::Transient(_) | ChatError::SendFailed { .. } => {
                    tracing::warn!(error = %e, "Transient failure");
                    (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
                }
            },
            ServerError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let mut body = serde_json::json!({
            "error": message,
        });
        match &self {
            ServerError::Chat(ChatError::Unauthorized(denial)) => {
                body["reason"] = serde_json::json!(denial);
            }
            // The client keeps the failed message around for a manual retry.
            ServerError::Chat(ChatError::SendFailed { message, .. }) => {
                body["message"] = serde_json::json!(message);
            }
            ServerError::RateLimited { retry_after } => {
                body["retry_after_ms"] = serde_json::json!(retry_after.as_millis() as u64);
                // Retry-After is whole seconds; round up so clients never retry early.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                return (
                    status,
                    [(header::RETRY_AFTER, secs.to_string())],
                    axum::Json(body),
                )
                    .into_response();
            }
            _ => {}
        }

        (status, axum::Json(body)).into_response()
    }
}
