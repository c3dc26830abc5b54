//! Text Backend Port - 文本生成后端抽象

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::BackendError;

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 对话消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// 对话补全请求
#[derive(Debug, Clone, Default)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub stop: Vec<String>,
    pub max_tokens: Option<u32>,
    /// 续写最后一条助手消息，而不是另起一条
    pub continue_last: bool,
}

/// Text Backend Port
#[async_trait]
pub trait TextBackendPort: Send + Sync {
    /// 加载模型
    async fn load_model(&self, name: &str) -> Result<(), BackendError>;

    /// 卸载当前模型，释放显存给图片后端
    async fn unload_model(&self) -> Result<(), BackendError>;

    /// 对话补全，返回生成的文本
    async fn chat_completion(&self, request: &ChatCompletionRequest)
        -> Result<String, BackendError>;
}
