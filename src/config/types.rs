//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;

use crate::domain::generation::{Checkpoint, ConditioningType, PartialValueRange, ValueRange};
use crate::domain::lora::Lora;

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 图片后端配置
    #[serde(default)]
    pub sd: SdConfig,

    /// 文本后端配置
    #[serde(default)]
    pub tg: TgConfig,

    /// 命令默认值与取值范围
    #[serde(default)]
    pub commands: CommandsConfig,

    /// 已安装的 checkpoint
    #[serde(default)]
    pub checkpoints: CheckpointsConfig,

    /// ControlNet 配置
    #[serde(default)]
    pub controlnet: ControlNetConfig,

    /// 已安装的 LoRA
    #[serde(default)]
    pub lora: LoraConfig,

    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// 生成结束后终态快照的保留时间（秒）
    #[serde(default = "default_status_retention_secs")]
    pub status_retention_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5070
}

fn default_status_retention_secs() -> u64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            status_retention_secs: default_status_retention_secs(),
        }
    }
}

impl ServerConfig {
    /// 获取服务器地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_timeout_secs() -> u64 {
    600
}

/// 图片后端（Stable Diffusion WebUI API）配置
#[derive(Debug, Clone, Deserialize)]
pub struct SdConfig {
    /// 服务基础 URL
    #[serde(default = "default_sd_url")]
    pub url: String,

    /// 请求超时时间（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sd_url() -> String {
    "http://localhost:7860".to_string()
}

impl Default for SdConfig {
    fn default() -> Self {
        Self {
            url: default_sd_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// 文本后端配置
///
/// 未设置 URL 时禁用对话补全
#[derive(Debug, Clone, Deserialize)]
pub struct TgConfig {
    #[serde(default)]
    pub url: Option<String>,

    /// 请求超时时间（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// 切换到文本任务时加载的模型
    #[serde(default)]
    pub model: String,

    /// 请求未指定时的最大 token 数
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// 动作选择与出图指令中的机器人名称
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
}

fn default_bot_name() -> String {
    "Easel".to_string()
}

impl Default for TgConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
            model: String::new(),
            max_tokens: None,
            bot_name: default_bot_name(),
        }
    }
}

/// 命令配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub global: GlobalCommandConfig,

    #[serde(default)]
    pub txt2img: Txt2ImgCommandConfig,

    #[serde(default)]
    pub img2img: Img2ImgCommandConfig,
}

/// 全局默认值
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalCommandConfig {
    #[serde(default)]
    pub default_checkpoint: Option<String>,

    /// 始终添加到提示词前的文本
    #[serde(default)]
    pub always_included_prompt: Option<String>,

    #[serde(default)]
    pub always_included_negative_prompt: Option<String>,

    #[serde(default = "default_dimension")]
    pub width: ValueRange<u32>,

    #[serde(default = "default_dimension")]
    pub height: ValueRange<u32>,

    /// 像素预算
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,

    #[serde(default = "default_count")]
    pub count: ValueRange<u32>,

    #[serde(default = "default_sampler")]
    pub default_sampler: String,

    #[serde(default = "default_steps")]
    pub steps: ValueRange<u32>,

    #[serde(default = "default_cfg")]
    pub cfg: ValueRange<f64>,
}

fn default_dimension() -> ValueRange<u32> {
    ValueRange::new(1, 8192, 1024)
}

fn default_max_pixels() -> u64 {
    1280 * 1280
}

fn default_count() -> ValueRange<u32> {
    ValueRange::new(1, 9, 1)
}

fn default_sampler() -> String {
    "Euler a".to_string()
}

fn default_steps() -> ValueRange<u32> {
    ValueRange::new(1, 40, 25)
}

fn default_cfg() -> ValueRange<f64> {
    ValueRange::new(1.0, 30.0, 6.0)
}

impl Default for GlobalCommandConfig {
    fn default() -> Self {
        Self {
            default_checkpoint: None,
            always_included_prompt: None,
            always_included_negative_prompt: None,
            width: default_dimension(),
            height: default_dimension(),
            max_pixels: default_max_pixels(),
            count: default_count(),
            default_sampler: default_sampler(),
            steps: default_steps(),
            cfg: default_cfg(),
        }
    }
}

/// 命令级覆盖，缺省字段回退到全局配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandOverrides {
    #[serde(default)]
    pub default_checkpoint: Option<String>,
    #[serde(default)]
    pub always_included_prompt: Option<String>,
    #[serde(default)]
    pub always_included_negative_prompt: Option<String>,
    #[serde(default)]
    pub width: Option<PartialValueRange<u32>>,
    #[serde(default)]
    pub height: Option<PartialValueRange<u32>>,
    #[serde(default)]
    pub max_pixels: Option<u64>,
    #[serde(default)]
    pub count: Option<PartialValueRange<u32>>,
    #[serde(default)]
    pub default_sampler: Option<String>,
    #[serde(default)]
    pub steps: Option<PartialValueRange<u32>>,
    #[serde(default)]
    pub cfg: Option<PartialValueRange<f64>>,
}

/// txt2img 命令配置
#[derive(Debug, Clone, Deserialize)]
pub struct Txt2ImgCommandConfig {
    #[serde(flatten)]
    pub overrides: CommandOverrides,

    #[serde(default = "default_hires_factor")]
    pub hires_factor: ValueRange<f64>,

    /// 0 表示与主步数相同
    #[serde(default = "default_hires_steps")]
    pub hires_steps: ValueRange<u32>,

    #[serde(default = "default_hires_upscaler")]
    pub hires_upscaler: String,

    #[serde(default = "default_hires_denoising")]
    pub hires_denoising: ValueRange<f64>,
}

fn default_hires_factor() -> ValueRange<f64> {
    ValueRange::new(1.0, 20.0, 1.0)
}

fn default_hires_steps() -> ValueRange<u32> {
    ValueRange::new(0, 40, 0)
}

fn default_hires_upscaler() -> String {
    "Latent".to_string()
}

fn default_hires_denoising() -> ValueRange<f64> {
    ValueRange::new(0.0, 1.0, 0.65)
}

impl Default for Txt2ImgCommandConfig {
    fn default() -> Self {
        Self {
            overrides: CommandOverrides::default(),
            hires_factor: default_hires_factor(),
            hires_steps: default_hires_steps(),
            hires_upscaler: default_hires_upscaler(),
            hires_denoising: default_hires_denoising(),
        }
    }
}

/// img2img 命令配置
#[derive(Debug, Clone, Deserialize)]
pub struct Img2ImgCommandConfig {
    #[serde(flatten)]
    pub overrides: CommandOverrides,

    #[serde(default = "default_denoising_strength")]
    pub denoising_strength: ValueRange<f64>,

    /// 0 = Stretch, 1 = Crop, 2 = Fill, 3 = Latent
    #[serde(default = "default_resize_mode")]
    pub default_resize_mode: u8,
}

fn default_denoising_strength() -> ValueRange<f64> {
    ValueRange::new(0.0, 1.0, 0.6)
}

fn default_resize_mode() -> u8 {
    1
}

impl Default for Img2ImgCommandConfig {
    fn default() -> Self {
        Self {
            overrides: CommandOverrides::default(),
            denoising_strength: default_denoising_strength(),
            default_resize_mode: default_resize_mode(),
        }
    }
}

/// 已安装的 checkpoint 列表（第一个为回退默认值）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckpointsConfig {
    #[serde(default)]
    pub installed: Vec<Checkpoint>,
}

/// ControlNet 配置
#[derive(Debug, Clone, Deserialize)]
pub struct ControlNetConfig {
    #[serde(default = "default_controlnet_weight")]
    pub weight: ValueRange<f64>,

    /// 已安装的条件类型（第一个为回退默认值）
    #[serde(default)]
    pub installed: Vec<ConditioningType>,
}

fn default_controlnet_weight() -> ValueRange<f64> {
    ValueRange::new(0.0, 2.0, 1.0)
}

impl Default for ControlNetConfig {
    fn default() -> Self {
        Self {
            weight: default_controlnet_weight(),
            installed: Vec::new(),
        }
    }
}

/// LoRA 配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoraConfig {
    /// 列表展示的标签顺序
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub installed: Vec<Lora>,
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 用户偏好目录（每个用户一个 JSON 文件）
    #[serde(default = "default_preferences_dir")]
    pub preferences_dir: PathBuf,
}

fn default_preferences_dir() -> PathBuf {
    PathBuf::from("data/user-preferences")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            preferences_dir: default_preferences_dir(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
