//! Event Publisher Implementation
//!
//! WebSocket 事件推送实现：每个生成请求一个广播通道，并保留最新状态快照

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::application::ports::GeneratedImage;
use crate::domain::generation::DisplayParameters;

/// WebSocket 事件类型
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum WsEvent {
    /// 排队位置变更
    QueuePositionChanged {
        request_id: String,
        position: usize,
        display: DisplayParameters,
    },
    /// 开始生成
    GenerationStarted {
        request_id: String,
        display: DisplayParameters,
    },
    /// 生成成功
    GenerationSucceeded {
        request_id: String,
        seed: u32,
        images: Vec<GeneratedImage>,
        conditioning_previews: Vec<Option<String>>,
        display: DisplayParameters,
        warnings: Vec<String>,
    },
    /// 生成失败
    GenerationFailed {
        request_id: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        display: Option<DisplayParameters>,
        warnings: Vec<String>,
    },
}

impl WsEvent {
    pub fn request_id(&self) -> &str {
        match self {
            Self::QueuePositionChanged { request_id, .. }
            | Self::GenerationStarted { request_id, .. }
            | Self::GenerationSucceeded { request_id, .. }
            | Self::GenerationFailed { request_id, .. } => request_id,
        }
    }

    /// 成功或失败之后不会再有事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::GenerationSucceeded { .. } | Self::GenerationFailed { .. }
        )
    }
}

/// 最新事件快照
#[derive(Debug, Clone, Serialize)]
pub struct EventSnapshot {
    #[serde(flatten)]
    pub event: WsEvent,
    pub timestamp: DateTime<Utc>,
}

/// 事件发布器
pub struct EventPublisher {
    /// request_id -> broadcast sender
    request_channels: DashMap<String, broadcast::Sender<WsEvent>>,
    /// request_id -> 最新事件
    latest: DashMap<String, EventSnapshot>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            request_channels: DashMap::new(),
            latest: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅请求的事件
    ///
    /// 先建立订阅再读取快照，订阅之后发布的事件不会丢失
    pub fn subscribe(
        &self,
        request_id: &str,
    ) -> (Option<EventSnapshot>, broadcast::Receiver<WsEvent>) {
        let receiver = self
            .request_channels
            .entry(request_id.to_string())
            .or_insert_with(|| broadcast::channel(100).0)
            .subscribe();
        (self.latest(request_id), receiver)
    }

    /// 请求的最新事件
    pub fn latest(&self, request_id: &str) -> Option<EventSnapshot> {
        self.latest.get(request_id).map(|s| s.clone())
    }

    /// 发布事件：更新快照并推送给订阅者
    ///
    /// 终态之后的事件直接丢弃
    pub fn publish(&self, event: WsEvent) {
        let request_id = event.request_id().to_string();
        let snapshot = EventSnapshot {
            event: event.clone(),
            timestamp: Utc::now(),
        };
        match self.latest.entry(request_id.clone()) {
            Entry::Occupied(entry) if entry.get().event.is_terminal() => {
                tracing::debug!(request_id = %request_id, "Dropped event after terminal state");
                return;
            }
            Entry::Occupied(mut entry) => {
                entry.insert(snapshot);
            }
            Entry::Vacant(entry) => {
                entry.insert(snapshot);
            }
        }

        if let Some(sender) = self.request_channels.get(&request_id) {
            if let Err(e) = sender.send(event) {
                tracing::debug!(
                    request_id = %request_id,
                    error = %e,
                    "Failed to publish event (no receivers)"
                );
            }
        }
    }

    /// 连接关闭或快照保留期结束时调用：没有其他订阅者时释放通道，终态快照一并移除
    pub fn release(&self, request_id: &str) {
        self.request_channels
            .remove_if(request_id, |_, sender| sender.receiver_count() == 0);

        let terminal = self
            .latest
            .get(request_id)
            .map(|s| s.event.is_terminal())
            .unwrap_or(false);
        if terminal {
            self.latest.remove(request_id);
            tracing::debug!(request_id = %request_id, "Evicted terminal snapshot");
        }
    }

    pub fn tracked_requests(&self) -> usize {
        self.latest.len()
    }

    pub fn tracked_channels(&self) -> usize {
        self.request_channels.len()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
