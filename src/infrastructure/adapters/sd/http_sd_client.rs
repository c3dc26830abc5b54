//! HTTP SD Client - 调用 Stable-Diffusion-WebUI 风格的图片后端
//!
//! 实现 ImageBackendPort trait
//!
//! 后端 API:
//! POST {url}/sdapi/v1/txt2img
//! POST {url}/sdapi/v1/img2img
//! Response: {"images": ["<base64>", ...]} 或 {"error": "...", "detail": "...", "errors": "..."}

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::application::ports::{BackendError, ImageBackendPort, ImageGenerationResult};
use crate::domain::generation::{ConditioningUnit, GenerationMode, GenerationParameters};

/// 第二阶段沿用第一阶段的附加模块
const HIRES_SAME_MODULES: &str = "Use same choices";

/// 生成请求体 (JSON)
///
/// txt2img 与 img2img 共用，未使用的字段不序列化
#[derive(Debug, Serialize)]
struct SdHttpRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    init_images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    width: u32,
    height: u32,
    n_iter: u32,
    seed: u32,
    sampler_name: String,
    steps: u32,
    cfg_scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    denoising_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resize_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_hr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hr_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hr_second_pass_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hr_upscaler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hr_additional_modules: Option<Vec<String>>,
    override_settings: Map<String, Value>,
    alwayson_scripts: Map<String, Value>,
    save_images: bool,
}

impl SdHttpRequest {
    fn from_params(params: &GenerationParameters) -> Self {
        let mut override_settings = Map::new();
        if let Some(checkpoint) = &params.checkpoint {
            override_settings.insert("sd_model_checkpoint".into(), json!(checkpoint.name));
        }

        let mut alwayson_scripts = Map::new();
        if !params.conditioning.is_empty() {
            let args: Vec<Value> = params.conditioning.iter().map(conditioning_arg).collect();
            alwayson_scripts.insert("controlnet".into(), json!({ "args": args }));
        }

        let mut request = Self {
            init_images: None,
            prompt: params.prompt.clone(),
            negative_prompt: params.negative_prompt.clone(),
            width: params.size.width,
            height: params.size.height,
            n_iter: params.count,
            seed: params.seed,
            sampler_name: params.sampler.clone(),
            steps: params.steps,
            cfg_scale: params.cfg,
            denoising_strength: None,
            resize_mode: None,
            enable_hr: None,
            hr_scale: None,
            hr_second_pass_steps: None,
            hr_upscaler: None,
            hr_additional_modules: None,
            override_settings,
            alwayson_scripts,
            save_images: true,
        };

        match &params.mode {
            GenerationMode::TextToImage { hires } => {
                request.enable_hr = Some(hires.is_some());
                if let Some(hires) = hires {
                    request.hr_scale = Some(hires.factor);
                    request.hr_second_pass_steps = Some(hires.steps);
                    request.hr_upscaler = Some(hires.upscaler.clone());
                    request.hr_additional_modules = Some(vec![HIRES_SAME_MODULES.to_string()]);
                    request.denoising_strength = Some(hires.denoising);
                }
            }
            GenerationMode::ImageToImage {
                source_image,
                denoising_strength,
                resize_mode,
            } => {
                request.init_images = Some(vec![source_image.clone()]);
                request.denoising_strength = Some(*denoising_strength);
                request.resize_mode = Some(resize_mode.as_index());
            }
        }
        request
    }
}

/// ControlNet 单元参数，未配置的字段不发送
fn conditioning_arg(unit: &ConditioningUnit) -> Value {
    let params = &unit.kind.params;
    let mut arg = Map::new();
    arg.insert("input_image".into(), json!(unit.image));
    if let Some(module) = &params.module {
        arg.insert("module".into(), json!(module));
    }
    if let Some(model) = &params.model {
        arg.insert("model".into(), json!(model));
    }
    arg.insert("weight".into(), json!(unit.weight));
    if let Some(res) = params.processor_res {
        arg.insert("processor_res".into(), json!(res));
    }
    if let Some(a) = params.threshold_a {
        arg.insert("threshold_a".into(), json!(a));
    }
    if let Some(b) = params.threshold_b {
        arg.insert("threshold_b".into(), json!(b));
    }
    Value::Object(arg)
}

/// 生成响应体
#[derive(Debug, Default, Deserialize)]
struct SdHttpResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    errors: Option<String>,
}

/// `detail` 可能是字符串，也可能是校验错误列表
fn detail_text(detail: Option<Value>) -> Option<String> {
    match detail? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// 把状态码与响应体映射为结果
fn parse_response(success: bool, status: &str, body: &str) -> Result<ImageGenerationResult, BackendError> {
    let response: SdHttpResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(_) if !success => {
            return Err(BackendError::ServiceError {
                message: None,
                detail: Some(format!("HTTP {}: {}", status, body)),
                errors: None,
            })
        }
        Err(e) => return Err(BackendError::InvalidResponse(e.to_string())),
    };

    if response.error.is_some() || !success {
        return Err(BackendError::ServiceError {
            message: response.error,
            detail: detail_text(response.detail),
            errors: response.errors,
        });
    }

    Ok(ImageGenerationResult {
        images: response.images,
    })
}

/// HTTP SD 客户端配置
#[derive(Debug, Clone)]
pub struct HttpSdClientConfig {
    /// 后端基础 URL
    pub base_url: String,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
}

impl Default for HttpSdClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7860".to_string(),
            timeout_secs: 600,
        }
    }
}

impl HttpSdClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// HTTP SD 客户端
pub struct HttpSdClient {
    client: Client,
    config: HttpSdClientConfig,
}

impl HttpSdClient {
    pub fn new(config: HttpSdClientConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, mode: &GenerationMode) -> String {
        format!(
            "{}/sdapi/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            mode.as_str()
        )
    }
}

#[async_trait]
impl ImageBackendPort for HttpSdClient {
    async fn generate(
        &self,
        params: &GenerationParameters,
    ) -> Result<ImageGenerationResult, BackendError> {
        let url = self.endpoint(&params.mode);
        let request = SdHttpRequest::from_params(params);

        tracing::debug!(
            url = %url,
            size = %params.size,
            count = params.count,
            seed = params.seed,
            "Sending image generation request"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else if e.is_connect() {
                    BackendError::NetworkError(format!("Cannot connect to image backend: {}", e))
                } else {
                    BackendError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::InvalidResponse(format!("Failed to read response: {}", e))
            }
        })?;

        let result = parse_response(status.is_success(), status.as_str(), &body)?;
        tracing::info!(images = result.images.len(), "Image generation completed");
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        let url = format!(
            "{}/sdapi/v1/samplers",
            self.config.base_url.trim_end_matches('/')
        );
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
