use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Wire shape of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Request-level failures, each mapped to exactly one status and error code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing_fields")]
    MissingFields,
    #[error("missing_email")]
    MissingEmail,
    #[error("email_in_use")]
    EmailInUse,
    #[error("invalid_credentials")]
    InvalidCredentials,
    #[error("missing_token")]
    MissingToken,
    #[error("invalid_token")]
    InvalidToken,
    #[error("not_found")]
    NotFound,
    #[error("invalid_or_expired_token")]
    VerificationTokenInvalid,
    #[error("internal_error")]
    Database(#[from] sqlx::Error),
    #[error("internal_error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFields | ApiError::MissingEmail => StatusCode::BAD_REQUEST,
            ApiError::VerificationTokenInvalid => StatusCode::BAD_REQUEST,
            ApiError::EmailInUse => StatusCode::CONFLICT,
            ApiError::InvalidCredentials | ApiError::MissingToken | ApiError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Database(e) => error!(error = %e, "storage failure"),
            ApiError::Internal(e) => error!(error = %e, "internal failure"),
            _ => {}
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
