//! Chat Commands - 对话补全

use crate::application::commands::handlers::PendingGeneration;
use crate::application::ports::{ChatMessage, GenerationFailure};
use crate::domain::chat::ChatAction;

/// 对话补全命令
#[derive(Debug, Clone, Default)]
pub struct ChatCompletionCommand {
    pub messages: Vec<ChatMessage>,
    pub stop: Vec<String>,
    /// 未指定时使用配置的默认值
    pub max_tokens: Option<u32>,
    /// 出图时用于读取偏好的用户标识，启用动作选择时必填
    pub user_id: Option<String>,
    /// 先选择回应动作，图片动作在回复之后追加一个生成请求
    pub actions: bool,
}

/// 回复之后追加的生成请求
#[derive(Debug)]
pub enum FollowUpGeneration {
    /// 已排在对话任务之后
    Queued(PendingGeneration),
    /// 参数无法提取或解析失败，已通过失败回调报告
    Rejected(GenerationFailure),
}

/// 对话补全响应
#[derive(Debug)]
pub struct ChatCompletionResponse {
    pub text: String,
    /// 未启用动作选择时为 None
    pub action: Option<ChatAction>,
    pub generation: Option<FollowUpGeneration>,
}
