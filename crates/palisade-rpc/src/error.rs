use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Core error: {0}")]
    Core(#[from] palisade_core::CoreError),
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RpcError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            RpcError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RpcError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            RpcError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            RpcError::Core(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = json!({
            "error": message
        });

        (status, axum::Json(body)).into_response()
    }
}
