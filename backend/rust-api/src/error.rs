use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use thiserror::Error;

use crate::models::{ApiErrorBody, ApiErrorDetail};

/// Errors shared by the quiz service, the HTTP client and the session engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz not found: {0}")]
    NotFound(String),

    /// The operation is not valid for the quiz's current status.
    #[error("conflicting state: {0}")]
    ConflictingState(String),

    #[error("quiz is not paused")]
    NotPaused,

    #[error("network error: {0}")]
    Network(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl QuizError {
    pub fn code(&self) -> &'static str {
        match self {
            QuizError::NotFound(_) => "NOT_FOUND",
            QuizError::ConflictingState(_) => "CONFLICTING_STATE",
            QuizError::NotPaused => "NOT_PAUSED",
            QuizError::Network(_) => "NETWORK_ERROR",
            QuizError::Validation(_) => "VALIDATION_ERROR",
            QuizError::Unsupported(_) => "UNSUPPORTED",
            QuizError::Timeout(_) => "TIMEOUT",
            QuizError::Storage(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            QuizError::NotFound(_) => StatusCode::NOT_FOUND,
            QuizError::ConflictingState(_) | QuizError::NotPaused => StatusCode::CONFLICT,
            QuizError::Validation(_) => StatusCode::BAD_REQUEST,
            QuizError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            QuizError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            QuizError::Network(_) => StatusCode::BAD_GATEWAY,
            QuizError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Transient failures worth another attempt while initializing or finishing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuizError::NotFound(_) | QuizError::Network(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, QuizError::ConflictingState(_) | QuizError::NotPaused)
    }

    /// Rebuilds a typed error from a quiz API error response.
    pub fn from_api(status: StatusCode, code: &str, message: String) -> Self {
        match (status, code) {
            (_, "NOT_PAUSED") => QuizError::NotPaused,
            (StatusCode::NOT_FOUND, _) | (_, "NOT_FOUND") => QuizError::NotFound(message),
            (StatusCode::CONFLICT, _) | (_, "CONFLICTING_STATE") => {
                QuizError::ConflictingState(message)
            }
            (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, _) => {
                QuizError::Validation(message)
            }
            _ => QuizError::Network(format!("{}: {}", status, message)),
        }
    }
}

impl From<validator::ValidationErrors> for QuizError {
    fn from(errors: validator::ValidationErrors) -> Self {
        QuizError::Validation(errors.to_string())
    }
}

impl From<reqwest::Error> for QuizError {
    fn from(err: reqwest::Error) -> Self {
        QuizError::Network(err.to_string())
    }
}

impl IntoResponse for QuizError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Quiz request failed: {}", self);
        } else {
            tracing::debug!("Quiz request rejected: {}", self);
        }

        let body = ApiErrorBody {
            success: false,
            error: ApiErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}
