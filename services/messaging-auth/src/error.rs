use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common_auth::AuthError;
use thiserror::Error;

/// Failures of the credential check.
///
/// Every variant renders as a bare status code with an empty body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("not authorized to query the authentication service")]
    Unauthorized,
    #[error("authentication service unavailable: {0}")]
    FailedDependency(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::FailedDependency(_) => StatusCode::FAILED_DEPENDENCY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::InvalidRequest { message } => {
                tracing::debug!(reason = %message, "rejecting credential check");
            }
            ApiError::Unauthorized => {
                tracing::error!(error = %self, "user management refused our credentials");
            }
            ApiError::FailedDependency(_) => {
                tracing::warn!(error = %self, "credential check failed");
            }
            ApiError::Internal(_) => tracing::error!(error = %self, "credential check failed"),
        }
        self.status().into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Unauthorized => ApiError::Unauthorized,
            AuthError::FailedDependency(reason) => ApiError::FailedDependency(reason),
            AuthError::Unexpected(reason) => ApiError::Internal(reason),
        }
    }
}
