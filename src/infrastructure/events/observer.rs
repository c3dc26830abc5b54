//! Publishing Observer - 把生成生命周期转换为 WebSocket 事件

use async_trait::async_trait;
use std::sync::Arc;

use super::{EventPublisher, WsEvent};
use crate::application::ports::{GenerationFailure, GenerationObserver, GenerationOutput};
use crate::domain::generation::DisplayParameters;

/// 每个请求一个实例
pub struct PublishingObserver {
    request_id: String,
    publisher: Arc<EventPublisher>,
}

impl PublishingObserver {
    pub fn new(request_id: impl Into<String>, publisher: Arc<EventPublisher>) -> Self {
        Self {
            request_id: request_id.into(),
            publisher,
        }
    }
}

#[async_trait]
impl GenerationObserver for PublishingObserver {
    async fn on_queue_position_changed(
        &self,
        position: usize,
        display: &DisplayParameters,
    ) -> anyhow::Result<()> {
        tracing::debug!(request_id = %self.request_id, position, "Queue position changed");
        self.publisher.publish(WsEvent::QueuePositionChanged {
            request_id: self.request_id.clone(),
            position,
            display: display.clone(),
        });
        Ok(())
    }

    async fn on_run_started(&self, display: &DisplayParameters) -> anyhow::Result<()> {
        self.publisher.publish(WsEvent::GenerationStarted {
            request_id: self.request_id.clone(),
            display: display.clone(),
        });
        Ok(())
    }

    async fn on_succeeded(&self, output: &GenerationOutput) -> anyhow::Result<()> {
        self.publisher.publish(WsEvent::GenerationSucceeded {
            request_id: self.request_id.clone(),
            seed: output.seed,
            images: output.images.clone(),
            conditioning_previews: output.conditioning_previews.clone(),
            display: output.display.clone(),
            warnings: output.warnings.clone(),
        });
        Ok(())
    }

    async fn on_failed(&self, failure: &GenerationFailure) -> anyhow::Result<()> {
        self.publisher.publish(WsEvent::GenerationFailed {
            request_id: self.request_id.clone(),
            error: failure.error.user_message(),
            display: failure.display.clone(),
            warnings: failure.warnings.clone(),
        });
        Ok(())
    }
}
