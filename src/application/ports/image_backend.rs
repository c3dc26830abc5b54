//! Image Backend Port - 图片生成后端抽象
//!
//! 定义图片生成的抽象接口，具体实现在 infrastructure/adapters 层

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::generation::GenerationParameters;

/// 后端返回的显存不足错误标识
pub const OUT_OF_MEMORY_ERROR: &str = "OutOfMemoryError";

/// 后端错误（图片与文本后端共用）
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Service error: {}", .message.as_deref().unwrap_or("unknown"))]
    ServiceError {
        message: Option<String>,
        detail: Option<String>,
        errors: Option<String>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(&'static str),
}

impl BackendError {
    /// 仅带消息的服务错误
    pub fn service(message: impl Into<String>) -> Self {
        Self::ServiceError {
            message: Some(message.into()),
            detail: None,
            errors: None,
        }
    }

    /// 面向用户的错误信息
    pub fn user_message(&self) -> String {
        match self {
            Self::ServiceError { message, .. } => match message.as_deref() {
                Some(OUT_OF_MEMORY_ERROR) => {
                    "Out of memory. Please reduce the size of the requested image.".to_string()
                }
                Some(message) if !message.is_empty() => message.to_string(),
                _ => "Unknown error.".to_string(),
            },
            Self::NetworkError(message) if !message.is_empty() => message.clone(),
            Self::Timeout => "The backend did not respond in time.".to_string(),
            Self::NotConfigured(backend) => format!("The {} backend is not configured.", backend),
            _ => "Unknown error.".to_string(),
        }
    }
}

/// 图片生成结果
///
/// `images` 的排列遵循后端约定：数量大于 1 时第一张是拼图预览，
/// 之后是各张输出，再之后是辅助条件单元的预处理预览
#[derive(Debug, Clone, Default)]
pub struct ImageGenerationResult {
    /// base64 编码的图片
    pub images: Vec<String>,
}

/// Image Backend Port
#[async_trait]
pub trait ImageBackendPort: Send + Sync {
    /// 执行一次生成请求（不重试）
    async fn generate(
        &self,
        params: &GenerationParameters,
    ) -> Result<ImageGenerationResult, BackendError>;

    /// 检查后端是否可用
    async fn health_check(&self) -> bool {
        true // 默认实现
    }
}
