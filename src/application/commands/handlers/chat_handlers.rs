//! Chat Completion Handler - 文本生成任务
//!
//! 对话补全与图片生成共用同一个执行队列，作为文本资源类别的任务运行。
//!
//! 启用动作选择时，任务先让模型从固定的动作集合中选一个；
//! 图片动作会再提取出图参数，回复生成后把 txt2img 请求排进同一个队列。
//! 追加的请求在对话任务出队之前注册，因此总是排在它后面。

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

use super::generation_handlers::report_failed;
use super::GenerationOrchestrator;
use crate::application::commands::chat_commands::{
    ChatCompletionCommand, ChatCompletionResponse, FollowUpGeneration,
};
use crate::application::commands::generation_commands::GenerationRequest;
use crate::application::error::{ApplicationError, GenerationError};
use crate::application::ports::{
    BackendError, ChatCompletionRequest, ChatMessage, GenerationFailure, GenerationObserver,
    NoopObserver, TextBackendPort,
};
use crate::application::queue::{ExecutionQueue, QueuedTask, ResourceClass};
use crate::domain::chat::{
    action_choice_instruction, image_parameters_instruction, match_checkpoint, ChatAction,
    ChatImageRequest, IMAGE_PARAMETERS_PREFIX,
};
use crate::domain::generation::Checkpoint;

type ChatResult = Result<ChatCompletionResponse, GenerationError>;

const ACTION_PREFIX: &str = "action=";
const ACTION_MAX_TOKENS: u32 = 10;
const IMAGE_PARAMETERS_MAX_TOKENS: u32 = 200;
const DEFAULT_BOT_NAME: &str = "Easel";

/// 图片动作使用的编排器与可选 checkpoint
#[derive(Clone)]
struct ImageGeneration {
    orchestrator: Arc<GenerationOrchestrator>,
    checkpoints: Arc<[Checkpoint]>,
}

/// ChatCompletion Handler
pub struct ChatCompletionHandler {
    queue: ExecutionQueue,
    text_backend: Option<Arc<dyn TextBackendPort>>,
    model: String,
    default_max_tokens: Option<u32>,
    bot_name: String,
    image_generation: Option<ImageGeneration>,
}

impl ChatCompletionHandler {
    pub fn new(
        queue: ExecutionQueue,
        text_backend: Option<Arc<dyn TextBackendPort>>,
        model: impl Into<String>,
        default_max_tokens: Option<u32>,
    ) -> Self {
        Self {
            queue,
            text_backend,
            model: model.into(),
            default_max_tokens,
            bot_name: DEFAULT_BOT_NAME.to_string(),
            image_generation: None,
        }
    }

    /// 指令中使用的机器人名称
    pub fn with_bot_name(mut self, bot_name: impl Into<String>) -> Self {
        self.bot_name = bot_name.into();
        self
    }

    /// 允许图片动作追加生成请求
    ///
    /// 编排器必须与本处理器共用同一个队列
    pub fn with_image_generation(
        mut self,
        orchestrator: Arc<GenerationOrchestrator>,
        checkpoints: Vec<Checkpoint>,
    ) -> Self {
        self.image_generation = Some(ImageGeneration {
            orchestrator,
            checkpoints: checkpoints.into(),
        });
        self
    }

    pub async fn handle(
        &self,
        cmd: ChatCompletionCommand,
    ) -> Result<ChatCompletionResponse, ApplicationError> {
        self.handle_with_observer(cmd, Arc::new(NoopObserver)).await
    }

    /// `observer` 接收追加生成请求的生命周期事件
    pub async fn handle_with_observer(
        &self,
        cmd: ChatCompletionCommand,
        observer: Arc<dyn GenerationObserver>,
    ) -> Result<ChatCompletionResponse, ApplicationError> {
        let Some(text_backend) = self.text_backend.clone() else {
            return Err(BackendError::NotConfigured("text generation").into());
        };
        if cmd.messages.is_empty() {
            return Err(ApplicationError::validation("At least one message is required"));
        }
        let user_id = cmd.user_id.filter(|id| !id.trim().is_empty());
        if cmd.actions && user_id.is_none() {
            return Err(ApplicationError::validation(
                "A user id is required when actions are enabled",
            ));
        }

        let (sender, receiver) = oneshot::channel();
        let task = ChatTask {
            conversation: cmd.messages,
            stop: cmd.stop,
            max_tokens: cmd.max_tokens.or(self.default_max_tokens),
            actions: cmd.actions,
            user_id: user_id.unwrap_or_default(),
            bot_name: self.bot_name.clone(),
            image_generation: self.image_generation.clone(),
            observer,
            model: self.model.clone(),
            text_backend,
            sender: Mutex::new(Some(sender)),
        };

        let task_id = self.queue.register(Arc::new(task)).await;
        tracing::info!(task_id = %task_id, actions = cmd.actions, "Chat completion queued");

        let response = receiver
            .await
            .map_err(|_| ApplicationError::internal("chat task was dropped"))??;
        Ok(response)
    }
}

struct ChatTask {
    conversation: Vec<ChatMessage>,
    stop: Vec<String>,
    max_tokens: Option<u32>,
    actions: bool,
    user_id: String,
    bot_name: String,
    image_generation: Option<ImageGeneration>,
    observer: Arc<dyn GenerationObserver>,
    model: String,
    text_backend: Arc<dyn TextBackendPort>,
    sender: Mutex<Option<oneshot::Sender<ChatResult>>>,
}

impl ChatTask {
    fn finish(&self, result: ChatResult) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }

    /// 系统指令 + 对话 + 可选的助手前缀（续写）
    fn prompted(&self, instruction: String, prefix: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.conversation.len() + 2);
        messages.push(ChatMessage::system(instruction));
        messages.extend(self.conversation.iter().cloned());
        messages.extend(prefix.map(ChatMessage::assistant));
        messages
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, GenerationError> {
        self.text_backend
            .chat_completion(request)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Chat completion failed");
                GenerationError::Backend(e)
            })
    }

    async fn choose_action(&self) -> ChatAction {
        let request = ChatCompletionRequest {
            messages: self.prompted(action_choice_instruction(&self.bot_name), Some(ACTION_PREFIX)),
            stop: vec!["\n".to_string()],
            max_tokens: Some(ACTION_MAX_TOKENS),
            continue_last: true,
        };
        match self.complete(&request).await {
            Ok(text) => ChatAction::parse(&text).unwrap_or_else(|| {
                tracing::debug!(output = %text, "No action in model output");
                ChatAction::Respond
            }),
            Err(_) => ChatAction::Respond,
        }
    }

    async fn image_parameters(&self, checkpoints: &[Checkpoint]) -> Option<ChatImageRequest> {
        let request = ChatCompletionRequest {
            messages: self.prompted(
                image_parameters_instruction(&self.bot_name, checkpoints),
                Some(IMAGE_PARAMETERS_PREFIX),
            ),
            stop: vec!["\n".to_string()],
            max_tokens: Some(IMAGE_PARAMETERS_MAX_TOKENS),
            continue_last: true,
        };
        let text = self.complete(&request).await.ok()?;
        let parsed = ChatImageRequest::parse(&format!("{}{}", IMAGE_PARAMETERS_PREFIX, text));
        if parsed.is_none() {
            tracing::warn!(output = %text, "No image parameters in model output");
        }
        parsed
    }

    /// 把提取的参数排进队列；此时对话任务仍在队首
    async fn follow_up(
        &self,
        image_generation: &ImageGeneration,
        parameters: Option<ChatImageRequest>,
    ) -> FollowUpGeneration {
        let Some(parameters) = parameters else {
            let failure = GenerationFailure {
                error: GenerationError::client("Could not work out what to draw."),
                display: None,
                warnings: Vec::new(),
            };
            report_failed(self.observer.as_ref(), &failure).await;
            return FollowUpGeneration::Rejected(failure);
        };

        let checkpoint = parameters.checkpoint.as_deref().and_then(|requested| {
            let matched = match_checkpoint(requested, &image_generation.checkpoints);
            if matched.is_none() {
                tracing::debug!(checkpoint = %requested, "Ignoring unknown checkpoint");
            }
            matched
        });
        let request = GenerationRequest {
            user_id: self.user_id.clone(),
            prompt: Some(parameters.prompt),
            negative_prompt: parameters.negative_prompt,
            checkpoint,
            width: parameters.width,
            height: parameters.height,
            seed: parameters.seed,
            ..Default::default()
        };

        match image_generation
            .orchestrator
            .enqueue(request, self.observer.clone())
            .await
        {
            Ok(pending) => FollowUpGeneration::Queued(pending),
            Err(failure) => FollowUpGeneration::Rejected(failure),
        }
    }

    async fn execute(&self, previous_class: Option<ResourceClass>) -> ChatResult {
        if previous_class != Some(ResourceClass::TextGeneration) && !self.model.is_empty() {
            tracing::info!(model = %self.model, "Loading text model");
            self.text_backend.load_model(&self.model).await.map_err(|e| {
                tracing::warn!(model = %self.model, error = %e, "Failed to load text model");
                GenerationError::Backend(e)
            })?;
        }

        if !self.actions {
            let request = ChatCompletionRequest {
                messages: self.conversation.clone(),
                stop: self.stop.clone(),
                max_tokens: self.max_tokens,
                continue_last: false,
            };
            let text = self.complete(&request).await?;
            return Ok(ChatCompletionResponse {
                text,
                action: None,
                generation: None,
            });
        }

        let action = self.choose_action().await;
        tracing::info!(action = action.label(), "Chat action chosen");

        let image = match &self.image_generation {
            Some(image_generation) if action.wants_image() => {
                let parameters = self.image_parameters(&image_generation.checkpoints).await;
                Some((image_generation, parameters))
            }
            _ => None,
        };

        let request = ChatCompletionRequest {
            messages: self.prompted(action.instruction().to_string(), None),
            stop: self.stop.clone(),
            max_tokens: self.max_tokens,
            continue_last: false,
        };
        let text = self.complete(&request).await?;

        let generation = match image {
            Some((image_generation, parameters)) => {
                Some(self.follow_up(image_generation, parameters).await)
            }
            None => None,
        };

        Ok(ChatCompletionResponse {
            text,
            action: Some(action),
            generation,
        })
    }
}

#[async_trait]
impl QueuedTask for ChatTask {
    fn resource_class(&self) -> ResourceClass {
        ResourceClass::TextGeneration
    }

    async fn on_position_changed(&self, position: usize) -> anyhow::Result<()> {
        tracing::debug!(position, "Chat completion queue position changed");
        Ok(())
    }

    async fn on_run(&self, previous_class: Option<ResourceClass>) -> anyhow::Result<()> {
        let result = self.execute(previous_class).await;
        self.finish(result);
        Ok(())
    }

    async fn on_cancelled(&self) {
        self.finish(Err(GenerationError::Cancelled));
    }
}
