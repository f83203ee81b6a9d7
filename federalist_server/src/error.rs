//! API error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

use crate::models::site::SiteValidationError;
use crate::services::cf_client::CfError;
use crate::services::github_service::GitHubError;

pub const NOT_LOGGED_IN: &str =
    "You are not permitted to perform this action. Are you sure you are logged in?";
pub const NOT_AUTHORIZED: &str = "You are not authorized to perform that action";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{}", NOT_LOGGED_IN)]
    Unauthenticated,

    #[error("{}", NOT_AUTHORIZED)]
    Forbidden,

    #[error("Invalid CSRF token")]
    InvalidCsrf,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found() -> Self {
        ApiError::NotFound("Not found".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated
            | ApiError::Forbidden
            | ApiError::InvalidCsrf
            | ApiError::Validation(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => ApiError::not_found(),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<SiteValidationError> for ApiError {
    fn from(e: SiteValidationError) -> Self {
        ApiError::Validation(e.0)
    }
}

impl From<GitHubError> for ApiError {
    fn from(e: GitHubError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<CfError> for ApiError {
    fn from(e: CfError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Internal(e) = &self {
            tracing::error!("Request failed: {e:#}");
        }
        let body = serde_json::json!({
            "message": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
