//! Request-facing error type.
//!
//! Per-job failures never become a [`ServiceError`] — they stay inside
//! `JobOutput::error` (see `execution::job`). This type only covers failures
//! that abort a whole submission before any job could be assembled.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("failed to materialize source file: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("failed to create container: {0}")]
    ContainerCreate(String),

    #[error("worker queue closed")]
    QueueClosed,

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::InvalidSubmission(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": true,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
