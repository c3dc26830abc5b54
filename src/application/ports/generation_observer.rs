//! Generation Observer Port - 生成请求的生命周期回调
//!
//! 每个生命周期事件对应一个方法；成功与失败回调对同一请求恰好触发一次

use async_trait::async_trait;
use serde::Serialize;

use crate::application::error::GenerationError;
use crate::domain::generation::DisplayParameters;

/// 单张输出图片
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedImage {
    pub seed: u32,
    /// base64 编码
    pub data: String,
}

/// 成功结果
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub images: Vec<GeneratedImage>,
    /// 与请求的辅助条件单元按位置对应，后端返回不足时为 None
    pub conditioning_previews: Vec<Option<String>>,
    pub seed: u32,
    pub display: DisplayParameters,
    pub warnings: Vec<String>,
}

/// 失败结果
#[derive(Debug, Clone)]
pub struct GenerationFailure {
    pub error: GenerationError,
    /// 参数解析阶段失败时为 None
    pub display: Option<DisplayParameters>,
    pub warnings: Vec<String>,
}

/// 终态
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Succeeded(GenerationOutput),
    Failed(GenerationFailure),
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn failure(
        error: GenerationError,
        display: Option<DisplayParameters>,
        warnings: Vec<String>,
    ) -> Self {
        Self::Failed(GenerationFailure {
            error,
            display,
            warnings,
        })
    }
}

/// Generation Observer
///
/// 回调返回的错误只记录日志，不会影响队列或正在执行的请求
#[async_trait]
pub trait GenerationObserver: Send + Sync {
    /// 排队位置变化
    async fn on_queue_position_changed(
        &self,
        position: usize,
        display: &DisplayParameters,
    ) -> anyhow::Result<()>;

    /// 开始执行
    async fn on_run_started(&self, display: &DisplayParameters) -> anyhow::Result<()>;

    /// 生成成功
    async fn on_succeeded(&self, output: &GenerationOutput) -> anyhow::Result<()>;

    /// 生成失败
    async fn on_failed(&self, failure: &GenerationFailure) -> anyhow::Result<()>;
}

/// 不关心进度的调用方使用
pub struct NoopObserver;

#[async_trait]
impl GenerationObserver for NoopObserver {
    async fn on_queue_position_changed(
        &self,
        _position: usize,
        _display: &DisplayParameters,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_run_started(&self, _display: &DisplayParameters) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_succeeded(&self, _output: &GenerationOutput) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_failed(&self, _failure: &GenerationFailure) -> anyhow::Result<()> {
        Ok(())
    }
}
