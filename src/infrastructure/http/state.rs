//! Application State
//!
//! 所有 HTTP handler 共享的状态

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::application::{
    // Command handlers
    ChatCompletionHandler, GenerationOrchestrator, PreferencesHandler,
    // Query handlers
    GetLoraHandler, ListLorasHandler,
    // Queue
    ExecutionQueue, TaskId,
};
use crate::domain::lora::LoraCatalog;
use crate::infrastructure::events::EventPublisher;

/// 应用状态
///
/// 队列实例与编排器、对话处理器共享同一个
pub struct AppState {
    pub queue: ExecutionQueue,
    pub event_publisher: Arc<EventPublisher>,

    // ========== Command Handlers ==========
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub preferences_handler: PreferencesHandler,
    pub chat_handler: ChatCompletionHandler,

    // ========== Query Handlers ==========
    pub list_loras_handler: ListLorasHandler,
    pub get_lora_handler: GetLoraHandler,

    /// 未完成的生成请求: request_id -> task_id
    pub pending: DashMap<String, TaskId>,

    /// 终态快照在生成结束后保留多久
    pub status_retention: Duration,
}

const DEFAULT_STATUS_RETENTION: Duration = Duration::from_secs(600);

impl AppState {
    pub fn new(
        queue: ExecutionQueue,
        event_publisher: Arc<EventPublisher>,
        orchestrator: Arc<GenerationOrchestrator>,
        preferences_handler: PreferencesHandler,
        chat_handler: ChatCompletionHandler,
        lora_catalog: Arc<LoraCatalog>,
    ) -> Self {
        Self {
            queue,
            event_publisher,
            orchestrator,
            preferences_handler,
            chat_handler,
            list_loras_handler: ListLorasHandler::new(lora_catalog.clone()),
            get_lora_handler: GetLoraHandler::new(lora_catalog),
            pending: DashMap::new(),
            status_retention: DEFAULT_STATUS_RETENTION,
        }
    }

    pub fn with_status_retention(mut self, retention: Duration) -> Self {
        self.status_retention = retention;
        self
    }
}
