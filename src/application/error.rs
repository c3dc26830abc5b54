//! 应用层错误定义
//!
//! - GenerationError: 单个生成/对话请求的终态错误
//! - ApplicationError: 命令处理器统一错误类型

use thiserror::Error;

use crate::application::ports::{BackendError, PreferenceError};

/// 生成请求错误
///
/// 客户端错误与后端错误都通过失败回调恰好报告一次，不会自动重试
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// 用户输入错误，不进入队列
    #[error("{0}")]
    Client(String),

    /// 后端调用失败
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// 排队期间被取消
    #[error("Request was cancelled")]
    Cancelled,

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GenerationError {
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Client(_))
    }

    /// 面向用户的错误信息
    pub fn user_message(&self) -> String {
        match self {
            Self::Client(message) => message.clone(),
            Self::Backend(err) => err.user_message(),
            Self::Cancelled => "The request was cancelled.".to_string(),
            Self::Internal(_) => "Unknown error.".to_string(),
        }
    }
}

/// 应用层错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 资源未找到
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// 验证错误（客户端错误）
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 外部服务错误
    #[error("External service error: {0}")]
    ExternalServiceError(#[from] BackendError),

    /// 请求已取消
    #[error("Request was cancelled")]
    Cancelled,

    /// 存储错误
    #[error("Storage error: {0}")]
    StorageError(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApplicationError {
    /// 创建 NotFound 错误
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// 创建验证错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }
}

impl From<PreferenceError> for ApplicationError {
    fn from(err: PreferenceError) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<GenerationError> for ApplicationError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Client(message) => Self::ValidationError(message),
            GenerationError::Backend(err) => Self::ExternalServiceError(err),
            GenerationError::Cancelled => Self::Cancelled,
            GenerationError::Internal(message) => Self::InternalError(message),
        }
    }
}
