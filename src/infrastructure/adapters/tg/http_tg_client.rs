//! HTTP TG Client - 调用 text-generation-webui 风格的文本后端
//!
//! 后端 API:
//! POST {url}/v1/internal/model/load   {"model_name": "..."}
//! POST {url}/v1/internal/model/unload
//! POST {url}/v1/chat/completions      OpenAI 兼容，取 choices[0].message.content

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::ports::{BackendError, ChatCompletionRequest, ChatMessage, TextBackendPort};

#[derive(Debug, Serialize)]
struct ModelLoadRequest<'a> {
    model_name: &'a str,
}

/// 对话补全请求体
#[derive(Debug, Serialize)]
struct ChatHttpRequest<'a> {
    mode: &'static str,
    instruction_template: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    auto_max_new_tokens: bool,
    messages: &'a [ChatMessage],
    stream: bool,
    stop: &'a [String],
    #[serde(rename = "continue_")]
    continue_last: bool,
}

impl<'a> ChatHttpRequest<'a> {
    fn new(request: &'a ChatCompletionRequest) -> Self {
        Self {
            mode: "instruct",
            instruction_template: "Alpaca",
            max_tokens: request.max_tokens,
            auto_max_new_tokens: true,
            messages: &request.messages,
            stream: false,
            stop: &request.stop,
            continue_last: request.continue_last,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatHttpResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

fn completion_text(response: ChatHttpResponse) -> Result<String, BackendError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .map(|message| message.content)
        .ok_or_else(|| BackendError::InvalidResponse("Response contains no choices".to_string()))
}

fn map_send_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else if e.is_connect() {
        BackendError::NetworkError(format!("Cannot connect to text backend: {}", e))
    } else {
        BackendError::NetworkError(e.to_string())
    }
}

/// 非 2xx 响应转为服务错误
async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_default();
    Err(BackendError::ServiceError {
        message: None,
        detail: Some(format!("HTTP {}: {}", status, error_text)),
        errors: None,
    })
}

/// HTTP TG 客户端配置
#[derive(Debug, Clone)]
pub struct HttpTgClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl HttpTgClientConfig {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs,
        }
    }
}

/// HTTP TG 客户端
pub struct HttpTgClient {
    client: Client,
    config: HttpTgClientConfig,
}

impl HttpTgClient {
    pub fn new(config: HttpTgClientConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl TextBackendPort for HttpTgClient {
    async fn load_model(&self, name: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url("/v1/internal/model/load"))
            .json(&ModelLoadRequest { model_name: name })
            .send()
            .await
            .map_err(map_send_error)?;
        ensure_success(response).await?;
        tracing::info!(model = %name, "Text model loaded");
        Ok(())
    }

    async fn unload_model(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url("/v1/internal/model/unload"))
            .send()
            .await
            .map_err(map_send_error)?;
        ensure_success(response).await?;
        tracing::info!("Text model unloaded");
        Ok(())
    }

    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<String, BackendError> {
        tracing::debug!(
            messages = request.messages.len(),
            max_tokens = ?request.max_tokens,
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .json(&ChatHttpRequest::new(request))
            .send()
            .await
            .map_err(map_send_error)?;
        let response: ChatHttpResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let text = completion_text(response)?;
        tracing::info!(text_len = text.len(), "Chat completion finished");
        Ok(text)
    }
}
