//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod generation_observer;
mod image_backend;
mod preference_store;
mod text_backend;

pub use generation_observer::{
    GeneratedImage, GenerationFailure, GenerationObserver, GenerationOutcome, GenerationOutput,
    NoopObserver,
};
pub use image_backend::{BackendError, ImageBackendPort, ImageGenerationResult, OUT_OF_MEMORY_ERROR};
pub use preference_store::{PreferenceError, PreferenceStorePort};
pub use text_backend::{ChatCompletionRequest, ChatMessage, ChatRole, TextBackendPort};
