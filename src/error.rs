use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::password::PasswordError;
use crate::repo::RepoError;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
}

/// Every client-correctable failure is a 400; only unexpected failures become a 500.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] Validation(&'static str),
    #[error("{0}")] NotFound(&'static str),
    #[error("incorrect password")] IncorrectPassword,
    #[error("Server error")] Internal,
}

impl ApiError {
    pub const MISSING_FIELDS: ApiError = ApiError::Validation("Missing required fields");
    pub const THREAD_NOT_FOUND: ApiError = ApiError::NotFound("Thread not found");
    pub const REPLY_NOT_FOUND: ApiError = ApiError::NotFound("Reply not found");
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::THREAD_NOT_FOUND,
            RepoError::Internal(msg) => {
                tracing::error!("repository error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(e: PasswordError) -> Self {
        tracing::error!("password error: {e}");
        ApiError::Internal
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string() })
    }
}
