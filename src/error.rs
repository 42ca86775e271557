use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::model::TaskKind;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other: {0}")]
    Other(String),
}

/// Failures reaching or running the generation pipeline. The backend adapter
/// folds these into its result value instead of returning them to callers of
/// `generate`.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("pipeline initialization failed: {0}")]
    Initialization(String),
    #[error("task kind {0} is not supported by this pipeline")]
    UnsupportedTask(TaskKind),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model execution failed: {0}")]
    Inference(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected pipeline output: {0}")]
    MalformedOutput(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("interaction store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid interaction record: {0}")]
    InvalidRecord(String),
    #[error("could not decode stored interaction: {0}")]
    Decode(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Store(StoreError::InvalidRecord(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Store(StoreError::Decode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
