//! Data Transfer Objects

use serde::{Deserialize, Serialize};

use crate::application::{
    ChatCompletionCommand, ChatMessage, ConditioningRequest, GenerationKind, GenerationRequest,
    GetLora, ListLoras, LoraInfoResponse, LoraListResponse, LoraSummary, PreferencesCommand,
};
use crate::domain::chat::ChatAction;
use crate::domain::generation::{DisplayParameters, ResizeMode};
use crate::domain::preferences::{PreferenceField, UserPreferences};

// ============================================================================
// 统一响应结构
// ============================================================================

/// 统一 API 响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub errno: i32,
    pub error: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 成功响应
    pub fn success(data: T) -> Self {
        Self {
            errno: 0,
            error: String::new(),
            data: Some(data),
        }
    }
}

// ============================================================================
// Generation DTOs
// ============================================================================

/// txt2img 与 img2img 共用的字段
#[derive(Debug, Default, Deserialize)]
pub struct CommonGenerationDto {
    #[serde(default)]
    pub user_id: String,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub checkpoint: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub count: Option<u32>,
    pub seed: Option<u32>,
    pub sampler: Option<String>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    #[serde(default)]
    pub controlnet: Vec<ControlNetDto>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ControlNetDto {
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub weight: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Txt2ImgRequest {
    #[serde(flatten)]
    pub common: CommonGenerationDto,
    pub hires_factor: Option<f64>,
    pub hires_steps: Option<u32>,
    pub hires_denoising: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Img2ImgRequest {
    #[serde(flatten)]
    pub common: CommonGenerationDto,
    pub source_image: Option<String>,
    pub source_width: Option<u32>,
    pub source_height: Option<u32>,
    pub denoising_strength: Option<f64>,
    pub resize_mode: Option<ResizeMode>,
}

impl CommonGenerationDto {
    fn into_request(self, kind: GenerationKind) -> GenerationRequest {
        GenerationRequest {
            user_id: self.user_id,
            kind,
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            checkpoint: self.checkpoint,
            width: self.width,
            height: self.height,
            count: self.count,
            seed: self.seed,
            sampler: self.sampler,
            steps: self.steps,
            cfg: self.cfg,
            conditioning: self
                .controlnet
                .into_iter()
                .map(|c| ConditioningRequest {
                    image: c.image,
                    kind: c.kind,
                    weight: c.weight,
                })
                .collect(),
        }
    }
}

impl From<Txt2ImgRequest> for GenerationRequest {
    fn from(req: Txt2ImgRequest) -> Self {
        req.common.into_request(GenerationKind::TextToImage {
            hires_factor: req.hires_factor,
            hires_steps: req.hires_steps,
            hires_denoising: req.hires_denoising,
        })
    }
}

impl From<Img2ImgRequest> for GenerationRequest {
    fn from(req: Img2ImgRequest) -> Self {
        req.common.into_request(GenerationKind::ImageToImage {
            source_image: req.source_image,
            source_width: req.source_width,
            source_height: req.source_height,
            denoising_strength: req.denoising_strength,
            resize_mode: req.resize_mode,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub request_id: String,
    pub task_id: u64,
    /// 入队时的位置，已开始执行时为 None
    pub position: Option<usize>,
    pub display: DisplayParameters,
}

#[derive(Debug, Deserialize)]
pub struct RequestIdDto {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub length: usize,
    pub last_active_class: Option<&'static str>,
}

// ============================================================================
// Preferences DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PreferencesCommandDto {
    List,
    Set { fields: UserPreferences },
    Reset { fields: Vec<PreferenceField> },
    Clear,
}

impl From<PreferencesCommandDto> for PreferencesCommand {
    fn from(dto: PreferencesCommandDto) -> Self {
        match dto {
            PreferencesCommandDto::List => Self::List,
            PreferencesCommandDto::Set { fields } => Self::Set(fields),
            PreferencesCommandDto::Reset { fields } => Self::Reset(fields),
            PreferencesCommandDto::Clear => Self::Clear,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    pub user_id: String,
    pub command: PreferencesCommandDto,
}

// ============================================================================
// Chat DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequestDto {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stop: Vec<String>,
    pub max_tokens: Option<u32>,
    pub user_id: Option<String>,
    /// 启用动作选择，图片动作会在回复之后追加生成请求
    #[serde(default)]
    pub actions: bool,
}

impl From<ChatCompletionRequestDto> for ChatCompletionCommand {
    fn from(dto: ChatCompletionRequestDto) -> Self {
        Self {
            messages: dto.messages,
            stop: dto.stop,
            max_tokens: dto.max_tokens,
            user_id: dto.user_id,
            actions: dto.actions,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponseDto {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ChatAction>,
    /// 追加的生成请求，进度与普通生成请求一样查询
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerateResponse>,
    /// 追加的生成请求被拒绝时的原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}

// ============================================================================
// LoRA DTOs
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListLorasRequest {
    #[serde(default)]
    pub nsfw: bool,
    pub tag: Option<String>,
    pub query: Option<String>,
}

impl From<ListLorasRequest> for ListLoras {
    fn from(req: ListLorasRequest) -> Self {
        Self {
            nsfw: req.nsfw,
            tag: req.tag,
            query: req.query,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GetLoraRequest {
    pub id: String,
    #[serde(default)]
    pub nsfw: bool,
}

impl From<GetLoraRequest> for GetLora {
    fn from(req: GetLoraRequest) -> Self {
        Self {
            id: req.id,
            nsfw: req.nsfw,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoraSummaryDto {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
}

impl From<LoraSummary> for LoraSummaryDto {
    fn from(summary: LoraSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            tags: summary.tags,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoraListResponseDto {
    pub loras: Vec<LoraSummaryDto>,
    pub tags: Vec<String>,
}

impl From<LoraListResponse> for LoraListResponseDto {
    fn from(response: LoraListResponse) -> Self {
        Self {
            loras: response.loras.into_iter().map(LoraSummaryDto::from).collect(),
            tags: response.tags,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoraInfoResponseDto {
    pub id: String,
    pub name: String,
    pub activation_key: String,
    pub keywords: Vec<String>,
    pub weight_hint: Option<String>,
    pub tags: Vec<String>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl From<LoraInfoResponse> for LoraInfoResponseDto {
    fn from(info: LoraInfoResponse) -> Self {
        Self {
            id: info.id,
            name: info.name,
            activation_key: info.activation_key,
            keywords: info.keywords,
            weight_hint: info.weight_hint,
            tags: info.tags,
            url: info.url,
            thumbnail_url: info.thumbnail_url,
        }
    }
}
