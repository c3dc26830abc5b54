//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml，或 `EASEL_CONFIG` 指定的文件）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::types::{AppConfig, CommandOverrides};
use crate::domain::generation::{effective_range, ResizeMode, ValueRange};

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 指定配置文件路径的环境变量
const CONFIG_PATH_ENV: &str = "EASEL_CONFIG";

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `EASEL_`，层级分隔符 `__`）
/// 2. 配置文件（`EASEL_CONFIG` 指定的文件，否则 config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `EASEL_SERVER__PORT=8080`
/// - `EASEL_SD__URL=http://sd-webui:7860`
/// - `EASEL_TG__URL=http://text-gen:5000`
/// - `EASEL_COMMANDS__GLOBAL__MAX_PIXELS=1048576`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    load_config_from_path(explicit.as_deref())
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 首先设置默认值（最低优先级），嵌套的取值范围由 serde 默认值补齐
    builder = builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5070)?
        .set_default("sd.url", "http://localhost:7860")?
        .set_default("sd.timeout_secs", 600)?
        .set_default("tg.timeout_secs", 600)?
        .set_default("storage.preferences_dir", "data/user-preferences")?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 添加配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 添加环境变量（最高优先级）
    // 例如: EASEL_SD__URL=http://sd-webui:7860
    // 注意: 环境变量名会被转换为小写
    builder = builder.add_source(
        Environment::with_prefix("EASEL")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

fn check_range<T: PartialOrd + Copy + Display>(
    name: &str,
    range: &ValueRange<T>,
) -> Result<(), ConfigError> {
    if range.is_valid() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{} must satisfy min <= default <= max (got min={}, default={}, max={})",
            name, range.min, range.default, range.max
        )))
    }
}

/// 校验命令级覆盖叠加到全局范围后的结果
fn check_command(
    command: &str,
    overrides: &CommandOverrides,
    config: &AppConfig,
) -> Result<(), ConfigError> {
    let global = &config.commands.global;
    let name = |field: &str| format!("commands.{}.{}", command, field);

    check_range(&name("width"), &effective_range(overrides.width.as_ref(), &global.width))?;
    check_range(&name("height"), &effective_range(overrides.height.as_ref(), &global.height))?;
    check_range(&name("steps"), &effective_range(overrides.steps.as_ref(), &global.steps))?;
    check_range(&name("cfg"), &effective_range(overrides.cfg.as_ref(), &global.cfg))?;

    let count = effective_range(overrides.count.as_ref(), &global.count);
    check_range(&name("count"), &count)?;
    if count.min < 1 {
        return Err(ConfigError::ValidationError(format!(
            "{} minimum must be at least 1",
            name("count")
        )));
    }

    if overrides.max_pixels == Some(0) {
        return Err(ConfigError::ValidationError(format!(
            "{} cannot be 0",
            name("max_pixels")
        )));
    }

    Ok(())
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "Server port cannot be 0".to_string(),
        ));
    }

    if config.sd.url.is_empty() {
        return Err(ConfigError::ValidationError(
            "Image backend URL cannot be empty".to_string(),
        ));
    }

    let global = &config.commands.global;
    check_range("commands.global.width", &global.width)?;
    check_range("commands.global.height", &global.height)?;
    check_range("commands.global.count", &global.count)?;
    check_range("commands.global.steps", &global.steps)?;
    check_range("commands.global.cfg", &global.cfg)?;
    if global.count.min < 1 {
        return Err(ConfigError::ValidationError(
            "commands.global.count minimum must be at least 1".to_string(),
        ));
    }
    if global.max_pixels == 0 {
        return Err(ConfigError::ValidationError(
            "commands.global.max_pixels cannot be 0".to_string(),
        ));
    }

    let txt2img = &config.commands.txt2img;
    check_command("txt2img", &txt2img.overrides, config)?;
    check_range("commands.txt2img.hires_factor", &txt2img.hires_factor)?;
    check_range("commands.txt2img.hires_steps", &txt2img.hires_steps)?;
    check_range("commands.txt2img.hires_denoising", &txt2img.hires_denoising)?;

    let img2img = &config.commands.img2img;
    check_command("img2img", &img2img.overrides, config)?;
    check_range("commands.img2img.denoising_strength", &img2img.denoising_strength)?;
    if ResizeMode::from_index(img2img.default_resize_mode).is_none() {
        return Err(ConfigError::ValidationError(format!(
            "Unknown resize mode: {}",
            img2img.default_resize_mode
        )));
    }

    check_range("controlnet.weight", &config.controlnet.weight)?;

    let mut lora_ids = HashSet::new();
    for lora in &config.lora.installed {
        if lora.id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "lora.installed entries need a non-empty id".to_string(),
            ));
        }
        // 两个目录共用激活键，因此 id 全局唯一
        if !lora_ids.insert(lora.id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Duplicate LoRA id: {}",
                lora.id
            )));
        }
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!("Image Backend URL: {}", config.sd.url);
    tracing::info!("Image Backend Timeout: {}s", config.sd.timeout_secs);
    match &config.tg.url {
        Some(url) => {
            tracing::info!("Text Backend URL: {}", url);
            tracing::info!("Text Backend Model: {}", config.tg.model);
        }
        None => tracing::info!("Text Backend: disabled"),
    }
    tracing::info!("Max Pixels: {}", config.commands.global.max_pixels);
    tracing::info!("Installed Checkpoints: {}", config.checkpoints.installed.len());
    tracing::info!("Installed ControlNet Types: {}", config.controlnet.installed.len());
    tracing::info!("Installed LoRAs: {}", config.lora.installed.len());
    tracing::info!("Preferences Directory: {:?}", config.storage.preferences_dir);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}
