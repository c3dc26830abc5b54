//! Easel - 图片生成聊天机器人后端
//!
//! 架构设计: DDD + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Generation Context: 尺寸约束、分层取值、生成参数
//! - Preferences Context: 用户偏好
//! - Chat Context: 对话动作、出图参数提取
//! - LoRA Context: 已安装的 LoRA 目录
//!
//! 应用层 (application/):
//! - Queue: 单执行者 FIFO 调度，带位置通知
//! - Ports: 端口定义（ImageBackend, TextBackend, PreferenceStore, GenerationObserver）
//! - Commands: 参数解析、生成编排、偏好、对话补全
//! - Queries: LoRA 列表与详情
//!
//! 基础设施层 (infrastructure/):
//! - HTTP: RESTful API + WebSocket
//! - Adapters: SD / TG HTTP 客户端，JSON 文件偏好存储
//! - Events: 生成进度事件发布

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
