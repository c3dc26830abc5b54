//! HTTP Error Handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::application::{ApplicationError, GenerationError};

/// 统一错误响应格式
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errno: i32,
    pub error: String,
    pub data: Option<()>,
}

impl ErrorResponse {
    pub fn new(errno: i32, error: impl Into<String>) -> Self {
        Self {
            errno,
            error: error.into(),
            data: None,
        }
    }
}

/// 错误码定义
pub mod errno {
    pub const BAD_REQUEST: i32 = 400;
    pub const NOT_FOUND: i32 = 404;
    pub const CONFLICT: i32 = 409;
    pub const INTERNAL_ERROR: i32 = 500;
    pub const BACKEND_ERROR: i32 = 502;
}

/// API 错误
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    /// 客户端错误：预期内，只记录 debug
    BadRequest(String),
    Conflict(String),
    Backend(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (i32, &str) {
        match self {
            ApiError::NotFound(msg) => (errno::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (errno::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (errno::CONFLICT, msg),
            ApiError::Backend(msg) => (errno::BACKEND_ERROR, msg),
            ApiError::Internal(msg) => (errno::INTERNAL_ERROR, msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, msg) = self.parts();
        match &self {
            ApiError::BadRequest(_) | ApiError::NotFound(_) | ApiError::Conflict(_) => {
                tracing::debug!(errno = code, error = %msg, "Client error")
            }
            ApiError::Backend(_) => tracing::warn!(errno = code, error = %msg, "Backend error"),
            ApiError::Internal(_) => {
                tracing::error!(errno = code, error = %msg, "Internal server error")
            }
        }

        // 业务错误通过 errno 区分，HTTP 状态码总是 200
        (StatusCode::OK, Json(ErrorResponse::new(code, msg))).into_response()
    }
}

impl From<ApplicationError> for ApiError {
    fn from(e: ApplicationError) -> Self {
        match e {
            ApplicationError::NotFound { resource_type, id } => {
                ApiError::NotFound(format!("{} not found: {}", resource_type, id))
            }
            ApplicationError::ValidationError(msg) => ApiError::BadRequest(msg),
            ApplicationError::ExternalServiceError(err) => ApiError::Backend(err.user_message()),
            ApplicationError::Cancelled => {
                ApiError::Conflict(GenerationError::Cancelled.user_message())
            }
            ApplicationError::StorageError(msg) => ApiError::Internal(msg),
            ApplicationError::InternalError(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        ApplicationError::from(e).into()
    }
}
