//! Generation Commands - 图片生成请求

use crate::domain::generation::{DisplayParameters, GenerationParameters, ResizeMode};

/// 调用方提交的原始生成请求
///
/// 所有字段都是可选覆盖，由 ParameterResolver 与偏好、配置合并
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// 用于读取偏好的用户标识
    pub user_id: String,
    pub kind: GenerationKind,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub checkpoint: Option<String>,
    /// 0 表示使用源图片的对应尺寸
    pub width: Option<u32>,
    /// 0 表示使用源图片的对应尺寸
    pub height: Option<u32>,
    pub count: Option<u32>,
    pub seed: Option<u32>,
    pub sampler: Option<String>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub conditioning: Vec<ConditioningRequest>,
}

/// 生成类型
#[derive(Debug, Clone)]
pub enum GenerationKind {
    TextToImage {
        hires_factor: Option<f64>,
        hires_steps: Option<u32>,
        hires_denoising: Option<f64>,
    },
    ImageToImage {
        /// base64 源图片，必填
        source_image: Option<String>,
        /// 未提供时从 PNG 头读取
        source_width: Option<u32>,
        source_height: Option<u32>,
        denoising_strength: Option<f64>,
        resize_mode: Option<ResizeMode>,
    },
}

impl Default for GenerationKind {
    fn default() -> Self {
        Self::TextToImage {
            hires_factor: None,
            hires_steps: None,
            hires_denoising: None,
        }
    }
}

/// 辅助条件单元请求
#[derive(Debug, Clone, Default)]
pub struct ConditioningRequest {
    /// base64 参考图片
    pub image: Option<String>,
    /// 条件类型名称
    pub kind: Option<String>,
    pub weight: Option<f64>,
}

/// 解析结果
#[derive(Debug, Clone)]
pub struct ResolvedGeneration {
    pub params: GenerationParameters,
    pub display: DisplayParameters,
    pub warnings: Vec<String>,
}
