//! Domain Layer - 领域层
//!
//! 包含四个限界上下文:
//! - Generation Context: 生成参数、尺寸约束、提示词合并
//! - Preferences Context: 用户偏好
//! - Chat Context: 对话动作与出图参数提取
//! - LoRA Context: 已安装的 LoRA 目录

pub mod chat;
pub mod generation;
pub mod lora;
pub mod preferences;
