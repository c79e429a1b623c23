use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use tutorhub_core::TutorHubError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    TutorHub(#[from] TutorHubError),

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Too many requests, try again later")]
    RateLimited,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::TutorHub(err) => match err {
                TutorHubError::NotFound { .. } => StatusCode::NOT_FOUND,
                TutorHubError::Conflict(_) => StatusCode::CONFLICT,
                TutorHubError::Validation(_) | TutorHubError::InvalidOperation(_) => {
                    StatusCode::BAD_REQUEST
                }
                TutorHubError::Authentication(_) => StatusCode::UNAUTHORIZED,
                TutorHubError::Io(_)
                | TutorHubError::Serialization(_)
                | TutorHubError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Storage and IO details stay in the log.
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
