//! Events - 生成进度事件

mod observer;
mod publisher;

pub use observer::PublishingObserver;
pub use publisher::{EventPublisher, EventSnapshot, WsEvent};
