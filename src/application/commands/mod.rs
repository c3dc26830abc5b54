//! 应用层 - 命令
//!
//! 生成请求、偏好子命令、对话补全及其处理器

mod chat_commands;
mod generation_commands;
mod preferences_commands;

pub mod handlers;

pub use chat_commands::*;
pub use generation_commands::*;
pub use preferences_commands::*;
