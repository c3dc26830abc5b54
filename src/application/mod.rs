//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（ImageBackend、TextBackend、PreferenceStore、GenerationObserver）
//! - queue: 单执行者 FIFO 调度队列
//! - commands: 命令及处理器（参数解析、生成编排、偏好、对话补全）
//! - queries: 查询及处理器（LoRA 目录）
//! - error: 应用层错误定义

pub mod commands;
pub mod error;
pub mod ports;
pub mod queries;
pub mod queue;

// Re-exports
pub use commands::{
    handlers::{
        ChatCompletionHandler, GenerationOrchestrator, ParameterResolver, PendingGeneration,
        PreferencesHandler,
    },
    ChatCompletionCommand, ChatCompletionResponse, ConditioningRequest, FollowUpGeneration,
    GenerationKind, GenerationRequest, PreferencesCommand, ResolvedGeneration,
};

pub use queries::{
    handlers::{
        GetLoraHandler, ListLorasHandler, LoraInfoResponse, LoraListResponse, LoraSummary,
    },
    GetLora, ListLoras,
};

pub use error::{ApplicationError, GenerationError};

pub use ports::{
    BackendError, ChatCompletionRequest, ChatMessage, ChatRole, GeneratedImage,
    GenerationFailure, GenerationObserver, GenerationOutcome, GenerationOutput,
    ImageBackendPort, ImageGenerationResult, NoopObserver, PreferenceError,
    PreferenceStorePort, TextBackendPort,
};

pub use queue::{ExecutionQueue, QueuedTask, ResourceClass, TaskId};
