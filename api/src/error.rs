//! Request-level error taxonomy and its HTTP mapping
//!
//! Cache failures never show up here: the cache store has its own
//! `CacheError` and the coordinator absorbs it.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a failed `resolve`. `Clone` because one failure is handed to
/// every caller waiting on the same in-flight computation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModerationError {
    /// Malformed request: bad JSON/base64, unknown operation or sensitivity
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Payload is not a decodable image
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Model could not be loaded or failed while scoring
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("inference timed out after {0:?}")]
    InferenceTimeout(Duration),
}

impl ModerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ModerationError::BadRequest(_) => "bad_request",
            ModerationError::InvalidImage(_) => "invalid_image",
            ModerationError::ModelUnavailable(_) => "model_unavailable",
            ModerationError::InferenceTimeout(_) => "inference_timeout",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ModerationError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ModerationError::InvalidImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ModerationError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ModerationError::InferenceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Caller fault (4xx) as opposed to a system fault (5xx)
    pub fn is_caller_fault(&self) -> bool {
        self.status().is_client_error()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModerationError::InferenceTimeout(_) | ModerationError::ModelUnavailable(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: String,
    retryable: bool,
}

impl IntoResponse for ModerationError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
                retryable: self.is_retryable(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
