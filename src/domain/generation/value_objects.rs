//! Generation Context - Value Objects

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Size;

/// 已安装的模型 checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 用户可见的标识（命令参数、偏好中使用）
    pub id: String,
    /// 后端识别的模型名称
    pub name: String,
}

/// img2img 缩放模式
///
/// 数值与图片后端的 `resize_mode` 字段一一对应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    Stretch,
    Crop,
    Fill,
    Latent,
}

impl ResizeMode {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Stretch),
            1 => Some(Self::Crop),
            2 => Some(Self::Fill),
            3 => Some(Self::Latent),
            _ => None,
        }
    }

    pub fn as_index(&self) -> u8 {
        match self {
            Self::Stretch => 0,
            Self::Crop => 1,
            Self::Fill => 2,
            Self::Latent => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Stretch => "Just resize",
            Self::Crop => "Crop and resize",
            Self::Fill => "Resize and fill",
            Self::Latent => "Just resize (latent upscale)",
        }
    }
}

/// 辅助条件类型（ControlNet 预处理器 + 模型）的后端参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditioningParams {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub processor_res: Option<u32>,
    #[serde(default)]
    pub threshold_a: Option<f64>,
    #[serde(default)]
    pub threshold_b: Option<f64>,
}

/// 已安装的辅助条件类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditioningType {
    pub name: String,
    #[serde(default)]
    pub params: ConditioningParams,
    /// 是否可以与 hires-fix 同时使用
    #[serde(default = "default_supports_hires")]
    pub supports_hires: bool,
}

fn default_supports_hires() -> bool {
    true
}

/// 一个辅助条件单元
#[derive(Debug, Clone, PartialEq)]
pub struct ConditioningUnit {
    /// 参考图片（base64）
    pub image: String,
    pub kind: ConditioningType,
    pub weight: f64,
}

/// Hires-fix 子参数
#[derive(Debug, Clone, PartialEq)]
pub struct HiresParams {
    /// 放大倍率，总是 > 1.0
    pub factor: f64,
    /// 第二阶段步数，0 表示与主步数相同
    pub steps: u32,
    pub upscaler: String,
    pub denoising: f64,
}

/// 生成模式
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationMode {
    TextToImage {
        hires: Option<HiresParams>,
    },
    ImageToImage {
        /// 源图片（base64）
        source_image: String,
        denoising_strength: f64,
        resize_mode: ResizeMode,
    },
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToImage { .. } => "txt2img",
            Self::ImageToImage { .. } => "img2img",
        }
    }

    pub fn hires(&self) -> Option<&HiresParams> {
        match self {
            Self::TextToImage { hires } => hires.as_ref(),
            Self::ImageToImage { .. } => None,
        }
    }
}

/// 完整解析后的生成参数
///
/// 创建后不再修改；所有数值都已落在配置声明的范围内
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParameters {
    pub mode: GenerationMode,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub size: Size,
    pub count: u32,
    pub seed: u32,
    pub sampler: String,
    pub steps: u32,
    pub cfg: f64,
    /// 为 None 时使用后端当前加载的模型
    pub checkpoint: Option<Checkpoint>,
    pub conditioning: Vec<ConditioningUnit>,
}

impl GenerationParameters {
    /// 第 `index` 张图片的种子
    pub fn seed_for(&self, index: u32) -> u32 {
        self.seed.wrapping_add(index)
    }

    /// 实际输出尺寸（应用 hires 放大后）
    pub fn output_size(&self) -> Size {
        match self.mode.hires() {
            Some(hires) => self.size.scale(hires.factor),
            None => self.size,
        }
    }

    /// 冻结用于展示的参数
    pub fn display(&self) -> DisplayParameters {
        let mut display = DisplayParameters::default();

        if let Some(prompt) = &self.prompt {
            display.push_main("Prompt", prompt);
        }
        if let Some(negative) = &self.negative_prompt {
            display.push_main("Negative prompt", negative);
        }
        let size = match self.mode.hires() {
            Some(_) => format!("{} (scaled up from {})", self.output_size(), self.size),
            None => self.size.to_string(),
        };
        display.push_main("Size", size);
        display.push_main("Seed", self.seed.to_string());

        if let Some(checkpoint) = &self.checkpoint {
            display.push_other("Checkpoint", &checkpoint.name);
        }
        display.push_other("Steps", self.steps.to_string());
        display.push_other("CFG", format!("{:.1}", self.cfg));
        display.push_other("Sampler", &self.sampler);

        match &self.mode {
            GenerationMode::TextToImage { hires: Some(hires) } => {
                display.push_other("Hires upscaler", &hires.upscaler);
                if hires.steps > 0 {
                    display.push_other("Hires steps", hires.steps.to_string());
                }
                display.push_other("Hires denoising", format!("{:.2}", hires.denoising));
            }
            GenerationMode::TextToImage { hires: None } => {}
            GenerationMode::ImageToImage {
                denoising_strength,
                resize_mode,
                ..
            } => {
                display.push_other("Denoising strength", format!("{:.2}", denoising_strength));
                display.push_other("Resize mode", resize_mode.label());
            }
        }

        for (index, unit) in self.conditioning.iter().enumerate() {
            display.push_other(
                format!("ControlNet {}", index + 1),
                format!("{} ({:.2})", unit.kind.name, unit.weight),
            );
        }

        display
    }
}

/// 展示用的参数条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayEntry {
    pub label: String,
    pub value: String,
}

/// 冻结的展示参数（有序）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayParameters {
    pub main: Vec<DisplayEntry>,
    pub other: Vec<DisplayEntry>,
}

impl DisplayParameters {
    pub fn push_main(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.main.push(DisplayEntry {
            label: label.into(),
            value: value.into(),
        });
    }

    pub fn push_other(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.other.push(DisplayEntry {
            label: label.into(),
            value: value.into(),
        });
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.main
            .iter()
            .chain(self.other.iter())
            .find(|entry| entry.label == label)
            .map(|entry| entry.value.as_str())
    }
}

impl fmt::Display for DisplayParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.main.iter().chain(self.other.iter()) {
            writeln!(f, "{}: {}", entry.label, entry.value)?;
        }
        Ok(())
    }
}
