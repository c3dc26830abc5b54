//! Generation Orchestrator - 单个生成请求的状态机
//!
//! Resolving -> Queued(position) -> Running -> Succeeded | Failed
//!
//! 解析失败直接进入 Failed，不进入队列；后端调用不重试。
//! 成功与失败回调对每个请求恰好触发一次。

use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

use super::ParameterResolver;
use crate::application::commands::generation_commands::GenerationRequest;
use crate::application::error::GenerationError;
use crate::application::ports::{
    BackendError, GeneratedImage, GenerationFailure, GenerationObserver, GenerationOutcome,
    GenerationOutput, ImageBackendPort, ImageGenerationResult, TextBackendPort,
};
use crate::application::queue::{ExecutionQueue, QueuedTask, ResourceClass, TaskId};
use crate::domain::generation::{DisplayParameters, GenerationParameters};

/// 已进入队列的请求
pub struct PendingGeneration {
    pub task_id: TaskId,
    pub display: DisplayParameters,
    receiver: oneshot::Receiver<GenerationOutcome>,
}

impl std::fmt::Debug for PendingGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingGeneration")
            .field("task_id", &self.task_id)
            .field("display", &self.display)
            .finish_non_exhaustive()
    }
}

impl PendingGeneration {
    /// 等待终态
    pub async fn outcome(self) -> GenerationOutcome {
        let display = self.display;
        self.receiver.await.unwrap_or_else(|_| {
            GenerationOutcome::failure(
                GenerationError::Internal("generation task was dropped".to_string()),
                Some(display),
                Vec::new(),
            )
        })
    }
}

/// GenerationOrchestrator
pub struct GenerationOrchestrator {
    resolver: Arc<ParameterResolver>,
    queue: ExecutionQueue,
    image_backend: Arc<dyn ImageBackendPort>,
    text_backend: Option<Arc<dyn TextBackendPort>>,
}

impl GenerationOrchestrator {
    pub fn new(
        resolver: Arc<ParameterResolver>,
        queue: ExecutionQueue,
        image_backend: Arc<dyn ImageBackendPort>,
        text_backend: Option<Arc<dyn TextBackendPort>>,
    ) -> Self {
        Self {
            resolver,
            queue,
            image_backend,
            text_backend,
        }
    }

    /// 解析参数并进入队列
    ///
    /// 解析失败时已通过 `on_failed` 报告，并返回失败结果
    pub async fn enqueue(
        &self,
        request: GenerationRequest,
        observer: Arc<dyn GenerationObserver>,
    ) -> Result<PendingGeneration, GenerationFailure> {
        let resolved = match self.resolver.resolve(&request).await {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::debug!(
                    user_id = %request.user_id,
                    error = %error,
                    "Generation request rejected"
                );
                let failure = GenerationFailure {
                    error,
                    display: None,
                    warnings: Vec::new(),
                };
                report_failed(observer.as_ref(), &failure).await;
                return Err(failure);
            }
        };

        let (sender, receiver) = oneshot::channel();
        let display = resolved.display.clone();
        let task = GenerationTask {
            params: resolved.params,
            display: resolved.display,
            warnings: resolved.warnings,
            observer,
            image_backend: self.image_backend.clone(),
            text_backend: self.text_backend.clone(),
            sender: Mutex::new(Some(sender)),
        };

        let task_id = self.queue.register(Arc::new(task)).await;
        tracing::info!(
            task_id = %task_id,
            user_id = %request.user_id,
            "Generation request queued"
        );

        Ok(PendingGeneration {
            task_id,
            display,
            receiver,
        })
    }

    /// 进入队列并等待终态
    pub async fn generate(
        &self,
        request: GenerationRequest,
        observer: Arc<dyn GenerationObserver>,
    ) -> GenerationOutcome {
        match self.enqueue(request, observer).await {
            Ok(pending) => pending.outcome().await,
            Err(failure) => GenerationOutcome::Failed(failure),
        }
    }

    /// 取消排队中的请求
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        self.queue.cancel(task_id).await
    }
}

async fn report_run_started(observer: &dyn GenerationObserver, display: &DisplayParameters) {
    match AssertUnwindSafe(observer.on_run_started(display))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Run-started callback failed"),
        Err(_) => tracing::warn!("Run-started callback panicked"),
    }
}

pub(super) async fn report_failed(observer: &dyn GenerationObserver, failure: &GenerationFailure) {
    match AssertUnwindSafe(observer.on_failed(failure))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failure callback failed"),
        Err(_) => tracing::warn!("Failure callback panicked"),
    }
}

async fn report_succeeded(observer: &dyn GenerationObserver, output: &GenerationOutput) {
    match AssertUnwindSafe(observer.on_succeeded(output))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Success callback failed"),
        Err(_) => tracing::warn!("Success callback panicked"),
    }
}

/// 按后端约定拆分返回的图片
///
/// 数量大于 1 时丢弃第一张拼图；随后 `count` 张为输出，
/// 再之后按位置对应辅助条件单元的预览
fn collect_output(
    params: &GenerationParameters,
    result: ImageGenerationResult,
    display: DisplayParameters,
    warnings: Vec<String>,
) -> Result<GenerationOutput, BackendError> {
    let mut images = result.images.into_iter();
    if params.count > 1 {
        images.next();
    }

    let outputs: Vec<GeneratedImage> = images
        .by_ref()
        .take(params.count as usize)
        .enumerate()
        .map(|(index, data)| GeneratedImage {
            seed: params.seed_for(index as u32),
            data,
        })
        .collect();
    if outputs.is_empty() {
        return Err(BackendError::InvalidResponse(
            "backend returned no images".to_string(),
        ));
    }

    let conditioning_previews = params.conditioning.iter().map(|_| images.next()).collect();

    Ok(GenerationOutput {
        images: outputs,
        conditioning_previews,
        seed: params.seed,
        display,
        warnings,
    })
}

/// 队列中的生成任务
struct GenerationTask {
    params: GenerationParameters,
    display: DisplayParameters,
    warnings: Vec<String>,
    observer: Arc<dyn GenerationObserver>,
    image_backend: Arc<dyn ImageBackendPort>,
    text_backend: Option<Arc<dyn TextBackendPort>>,
    /// 取走即表示已报告终态
    sender: Mutex<Option<oneshot::Sender<GenerationOutcome>>>,
}

impl GenerationTask {
    /// 报告终态；重复调用被忽略
    async fn finish(&self, outcome: GenerationOutcome) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            tracing::error!("Generation outcome reported twice");
            return;
        };

        match &outcome {
            GenerationOutcome::Succeeded(output) => {
                report_succeeded(self.observer.as_ref(), output).await;
            }
            GenerationOutcome::Failed(failure) => {
                report_failed(self.observer.as_ref(), failure).await;
            }
        }
        let _ = sender.send(outcome);
    }

    fn failure(&self, error: GenerationError) -> GenerationOutcome {
        GenerationOutcome::failure(error, Some(self.display.clone()), self.warnings.clone())
    }

    async fn execute(&self, previous_class: Option<ResourceClass>) -> GenerationOutcome {
        // 上一个任务是文本生成时先释放文本模型占用的显存
        if previous_class == Some(ResourceClass::TextGeneration) {
            if let Some(text_backend) = &self.text_backend {
                if let Err(e) = text_backend.unload_model().await {
                    tracing::warn!(error = %e, "Failed to unload text model, continuing");
                }
            }
        }

        match self.image_backend.generate(&self.params).await {
            Ok(result) => match collect_output(
                &self.params,
                result,
                self.display.clone(),
                self.warnings.clone(),
            ) {
                Ok(output) => GenerationOutcome::Succeeded(output),
                Err(e) => {
                    tracing::warn!(error = %e, "Unexpected image backend response");
                    self.failure(e.into())
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Image generation failed");
                self.failure(e.into())
            }
        }
    }
}

#[async_trait]
impl QueuedTask for GenerationTask {
    fn resource_class(&self) -> ResourceClass {
        ResourceClass::ImageGeneration
    }

    async fn on_position_changed(&self, position: usize) -> anyhow::Result<()> {
        self.observer
            .on_queue_position_changed(position, &self.display)
            .await
    }

    async fn on_run(&self, previous_class: Option<ResourceClass>) -> anyhow::Result<()> {
        report_run_started(self.observer.as_ref(), &self.display).await;

        let outcome = match AssertUnwindSafe(self.execute(previous_class))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => self.failure(GenerationError::Internal(
                "generation panicked".to_string(),
            )),
        };

        let images = match &outcome {
            GenerationOutcome::Succeeded(output) => output.images.len(),
            GenerationOutcome::Failed(_) => 0,
        };
        tracing::info!(success = outcome.is_success(), images, "Generation finished");
        self.finish(outcome).await;
        Ok(())
    }

    async fn on_cancelled(&self) {
        self.finish(self.failure(GenerationError::Cancelled)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::generation_commands::ConditioningRequest;
    use crate::application::ports::{ChatCompletionRequest, PreferenceError, PreferenceStorePort};
    use crate::config::{CheckpointsConfig, CommandsConfig, ControlNetConfig};
    use crate::domain::generation::{png_base64, ConditioningType};
    use crate::domain::preferences::UserPreferences;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct EmptyStore;

    #[async_trait]
    impl PreferenceStorePort for EmptyStore {
        async fn read(&self, _user_id: &str) -> Result<UserPreferences, PreferenceError> {
            Ok(UserPreferences::default())
        }

        async fn write(
            &self,
            _user_id: &str,
            _preferences: &UserPreferences,
        ) -> Result<(), PreferenceError> {
            Ok(())
        }
    }

    /// 返回 `images` 或错误；可选地等待放行
    struct FakeImageBackend {
        images: Vec<String>,
        error: Option<BackendError>,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
    }

    impl FakeImageBackend {
        fn returning(images: &[&str]) -> Self {
            Self {
                images: images.iter().map(|s| s.to_string()).collect(),
                error: None,
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(error: BackendError) -> Self {
            Self {
                error: Some(error),
                ..Self::returning(&[])
            }
        }
    }

    #[async_trait]
    impl ImageBackendPort for FakeImageBackend {
        async fn generate(
            &self,
            _params: &GenerationParameters,
        ) -> Result<ImageGenerationResult, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &self.error {
                Some(error) => Err(error.clone()),
                None => Ok(ImageGenerationResult {
                    images: self.images.clone(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeTextBackend {
        unloads: AtomicUsize,
    }

    #[async_trait]
    impl TextBackendPort for FakeTextBackend {
        async fn load_model(&self, _name: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn unload_model(&self) -> Result<(), BackendError> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::NetworkError("connection refused".to_string()))
        }

        async fn chat_completion(
            &self,
            _request: &ChatCompletionRequest,
        ) -> Result<String, BackendError> {
            Ok(String::new())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl GenerationObserver for RecordingObserver {
        async fn on_queue_position_changed(
            &self,
            position: usize,
            _display: &DisplayParameters,
        ) -> anyhow::Result<()> {
            self.push(format!("position:{}", position));
            Ok(())
        }

        async fn on_run_started(&self, _display: &DisplayParameters) -> anyhow::Result<()> {
            self.push("started".to_string());
            Ok(())
        }

        async fn on_succeeded(&self, output: &GenerationOutput) -> anyhow::Result<()> {
            self.push(format!("succeeded:{}", output.images.len()));
            Ok(())
        }

        async fn on_failed(&self, failure: &GenerationFailure) -> anyhow::Result<()> {
            self.push(format!("failed:{}", failure.error.user_message()));
            anyhow::bail!("observer is broken too")
        }
    }

    fn orchestrator(
        queue: ExecutionQueue,
        image_backend: Arc<dyn ImageBackendPort>,
        text_backend: Option<Arc<dyn TextBackendPort>>,
    ) -> GenerationOrchestrator {
        let controlnet = ControlNetConfig {
            installed: vec![ConditioningType {
                name: "canny".to_string(),
                params: Default::default(),
                supports_hires: true,
            }],
            ..Default::default()
        };
        let resolver = ParameterResolver::new(
            CommandsConfig::default(),
            CheckpointsConfig::default(),
            controlnet,
            Arc::new(EmptyStore),
        );
        GenerationOrchestrator::new(Arc::new(resolver), queue, image_backend, text_backend)
    }

    fn request(count: u32) -> GenerationRequest {
        GenerationRequest {
            user_id: "user-1".to_string(),
            prompt: Some("a cat".to_string()),
            count: Some(count),
            seed: Some(100),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_image_success() {
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator = orchestrator(
            ExecutionQueue::new(),
            Arc::new(FakeImageBackend::returning(&["img0"])),
            None,
        );

        let outcome = orchestrator.generate(request(1), observer.clone()).await;
        let GenerationOutcome::Succeeded(output) = outcome else {
            panic!("expected success");
        };
        assert_eq!(
            output.images,
            vec![GeneratedImage {
                seed: 100,
                data: "img0".to_string()
            }]
        );
        assert_eq!(
            observer.events(),
            vec!["position:0", "started", "succeeded:1"]
        );
    }

    #[tokio::test]
    async fn test_grid_is_dropped_and_previews_matched() {
        let orchestrator = orchestrator(
            ExecutionQueue::new(),
            Arc::new(FakeImageBackend::returning(&["grid", "a", "b", "preview"])),
            None,
        );
        let mut request = request(2);
        request.conditioning = vec![
            ConditioningRequest {
                image: Some(png_base64(8, 8)),
                ..Default::default()
            },
            ConditioningRequest {
                image: Some(png_base64(8, 8)),
                ..Default::default()
            },
        ];

        let outcome = orchestrator
            .generate(request, Arc::new(RecordingObserver::default()))
            .await;
        let GenerationOutcome::Succeeded(output) = outcome else {
            panic!("expected success");
        };
        let data: Vec<_> = output.images.iter().map(|i| i.data.as_str()).collect();
        let seeds: Vec<_> = output.images.iter().map(|i| i.seed).collect();
        assert_eq!(data, vec!["a", "b"]);
        assert_eq!(seeds, vec![100, 101]);
        assert_eq!(
            output.conditioning_previews,
            vec![Some("preview".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_backend_error_reported_once() {
        let observer = Arc::new(RecordingObserver::default());
        let backend = Arc::new(FakeImageBackend::failing(BackendError::service(
            "OutOfMemoryError",
        )));
        let orchestrator = orchestrator(ExecutionQueue::new(), backend.clone(), None);

        let outcome = orchestrator.generate(request(1), observer.clone()).await;
        let GenerationOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(failure.error, GenerationError::Backend(_)));
        assert!(failure.display.is_some());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            observer.events(),
            vec![
                "position:0",
                "started",
                "failed:Out of memory. Please reduce the size of the requested image."
            ]
        );
    }

    #[tokio::test]
    async fn test_client_error_bypasses_queue() {
        let observer = Arc::new(RecordingObserver::default());
        let backend = Arc::new(FakeImageBackend::returning(&["img0"]));
        let queue = ExecutionQueue::new();
        let orchestrator = orchestrator(queue.clone(), backend.clone(), None);

        let mut request = request(1);
        request.steps = Some(1000);
        let outcome = orchestrator.generate(request, observer.clone()).await;

        let GenerationOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert!(failure.error.is_client_error());
        assert!(failure.display.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(queue.is_empty());
        assert_eq!(observer.events().len(), 1);
    }

    #[tokio::test]
    async fn test_image_after_text_unloads_model_best_effort() {
        struct TextTask;

        #[async_trait]
        impl QueuedTask for TextTask {
            fn resource_class(&self) -> ResourceClass {
                ResourceClass::TextGeneration
            }

            async fn on_position_changed(&self, _position: usize) -> anyhow::Result<()> {
                Ok(())
            }

            async fn on_run(&self, _previous: Option<ResourceClass>) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let queue = ExecutionQueue::new();
        let text_backend = Arc::new(FakeTextBackend::default());
        let orchestrator = orchestrator(
            queue.clone(),
            Arc::new(FakeImageBackend::returning(&["img0"])),
            Some(text_backend.clone()),
        );

        queue.register(Arc::new(TextTask)).await;
        let outcome = orchestrator
            .generate(request(1), Arc::new(RecordingObserver::default()))
            .await;

        assert!(outcome.is_success());
        assert_eq!(text_backend.unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_start_callback_still_reports_outcome() {
        #[derive(Default)]
        struct PanicOnStart(RecordingObserver);

        #[async_trait]
        impl GenerationObserver for PanicOnStart {
            async fn on_queue_position_changed(
                &self,
                position: usize,
                display: &DisplayParameters,
            ) -> anyhow::Result<()> {
                self.0.on_queue_position_changed(position, display).await
            }

            async fn on_run_started(&self, _display: &DisplayParameters) -> anyhow::Result<()> {
                panic!("progress message vanished");
            }

            async fn on_succeeded(&self, output: &GenerationOutput) -> anyhow::Result<()> {
                self.0.on_succeeded(output).await
            }

            async fn on_failed(&self, failure: &GenerationFailure) -> anyhow::Result<()> {
                self.0.on_failed(failure).await
            }
        }

        let observer = Arc::new(PanicOnStart::default());
        let backend = Arc::new(FakeImageBackend::returning(&["img0"]));
        let orchestrator = orchestrator(ExecutionQueue::new(), backend.clone(), None);

        let outcome = orchestrator.generate(request(1), observer.clone()).await;

        assert!(outcome.is_success());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.0.events(), vec!["position:0", "succeeded:1"]);
    }

    #[tokio::test]
    async fn test_cancel_queued_generation() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeImageBackend {
            gate: Some(gate.clone()),
            ..FakeImageBackend::returning(&["img0"])
        });
        let orchestrator = orchestrator(ExecutionQueue::new(), backend, None);

        let first = orchestrator
            .enqueue(request(1), Arc::new(RecordingObserver::default()))
            .await
            .unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let second = orchestrator
            .enqueue(request(1), observer.clone())
            .await
            .unwrap();

        assert!(!orchestrator.cancel(first.task_id).await);
        assert!(orchestrator.cancel(second.task_id).await);
        let outcome = second.outcome().await;
        let GenerationOutcome::Failed(failure) = outcome else {
            panic!("expected cancellation");
        };
        assert!(matches!(failure.error, GenerationError::Cancelled));
        assert_eq!(
            observer.events(),
            vec!["position:1", "failed:The request was cancelled."]
        );

        gate.notify_one();
        let outcome = tokio::time::timeout(Duration::from_secs(2), first.outcome())
            .await
            .unwrap();
        assert!(outcome.is_success());
    }
}
