//! Parameter Resolver - 生成参数分层解析
//!
//! 每个可调字段的优先级（从高到低）：
//! 1. 调用时显式传入的值
//! 2. 用户偏好（checkpoint、steps、cfg、width、height、count、提示词前缀）
//! 3. 命令级配置
//! 4. 全局配置
//!
//! 提示词不是覆盖而是拼接：配置中"始终包含"的前缀加在用户文本之前。

use std::fmt::Display;
use std::sync::Arc;

use crate::application::commands::generation_commands::{
    ConditioningRequest, GenerationKind, GenerationRequest, ResolvedGeneration,
};
use crate::application::error::GenerationError;
use crate::application::ports::PreferenceStorePort;
use crate::config::{CheckpointsConfig, CommandOverrides, CommandsConfig, ControlNetConfig};
use crate::domain::generation::{
    effective_range, first_present, merge_prefix, resolve_desired_size, resolve_layered,
    Checkpoint, ConditioningUnit, GenerationMode, GenerationParameters, HiresParams, ResizeMode,
    Size, SourceImage, ValueRange,
};
use crate::domain::preferences::UserPreferences;

/// 显式值必须落在范围内；偏好与配置值被夹到范围内
fn pick<T>(
    name: &str,
    explicit: Option<T>,
    preference: Option<T>,
    range: &ValueRange<T>,
) -> Result<T, GenerationError>
where
    T: PartialOrd + Copy + Display,
{
    if let Some(value) = explicit {
        if !range.contains(value) {
            return Err(GenerationError::client(format!(
                "{} must be between {} and {}.",
                name, range.min, range.max
            )));
        }
    }
    Ok(range.clamp(resolve_layered([explicit, preference], range.default)))
}

/// 尺寸维度：0 保留为"使用源图片尺寸"
fn pick_dimension(
    name: &str,
    explicit: Option<u32>,
    range: &ValueRange<u32>,
) -> Result<Option<u32>, GenerationError> {
    match explicit {
        Some(0) | None => Ok(explicit),
        Some(value) if range.contains(value) => Ok(Some(value)),
        Some(_) => Err(GenerationError::client(format!(
            "{} must be between {} and {}.",
            name, range.min, range.max
        ))),
    }
}

/// ParameterResolver
///
/// 输出完整的 `GenerationParameters`，所有数值都在配置范围内
pub struct ParameterResolver {
    commands: CommandsConfig,
    checkpoints: Vec<Checkpoint>,
    controlnet: ControlNetConfig,
    preferences: Arc<dyn PreferenceStorePort>,
}

impl ParameterResolver {
    pub fn new(
        commands: CommandsConfig,
        checkpoints: CheckpointsConfig,
        controlnet: ControlNetConfig,
        preferences: Arc<dyn PreferenceStorePort>,
    ) -> Self {
        Self {
            commands,
            checkpoints: checkpoints.installed,
            controlnet,
            preferences,
        }
    }

    /// 读取用户偏好并解析
    ///
    /// 偏好读取失败时按全部未设置处理
    pub async fn resolve(
        &self,
        request: &GenerationRequest,
    ) -> Result<ResolvedGeneration, GenerationError> {
        let preferences = match self.preferences.read(&request.user_id).await {
            Ok(preferences) => preferences,
            Err(e) => {
                tracing::warn!(
                    user_id = %request.user_id,
                    error = %e,
                    "Failed to read user preferences, using defaults"
                );
                UserPreferences::default()
            }
        };
        self.resolve_with(request, &preferences)
    }

    /// 使用给定偏好解析
    pub fn resolve_with(
        &self,
        request: &GenerationRequest,
        preferences: &UserPreferences,
    ) -> Result<ResolvedGeneration, GenerationError> {
        let global = &self.commands.global;
        let overrides = self.overrides_for(&request.kind);
        let mut warnings = Vec::new();

        let steps = pick(
            "Steps",
            request.steps,
            preferences.steps,
            &effective_range(overrides.steps.as_ref(), &global.steps),
        )?;
        let cfg = pick(
            "CFG",
            request.cfg,
            preferences.cfg,
            &effective_range(overrides.cfg.as_ref(), &global.cfg),
        )?;
        let count = pick(
            "Count",
            request.count,
            preferences.count,
            &effective_range(overrides.count.as_ref(), &global.count),
        )?;

        let checkpoint = self.resolve_checkpoint(
            first_present([
                request.checkpoint.as_deref(),
                preferences.checkpoint.as_deref(),
                overrides.default_checkpoint.as_deref(),
                global.default_checkpoint.as_deref(),
            ]),
            &mut warnings,
        );
        let sampler = resolve_layered(
            [request.sampler.clone(), overrides.default_sampler.clone()],
            global.default_sampler.clone(),
        );
        let seed = request.seed.unwrap_or_else(rand::random);

        let prompt = merge_prefix(
            first_present([
                overrides.always_included_prompt.as_deref(),
                global.always_included_prompt.as_deref(),
            ]),
            merge_prefix(
                preferences.prompt_prefix.as_deref(),
                request.prompt.as_deref(),
            )
            .as_deref(),
        );
        let negative_prompt = merge_prefix(
            first_present([
                overrides.always_included_negative_prompt.as_deref(),
                global.always_included_negative_prompt.as_deref(),
            ]),
            merge_prefix(
                preferences.negative_prompt_prefix.as_deref(),
                request.negative_prompt.as_deref(),
            )
            .as_deref(),
        );

        // img2img 源图片在尺寸之前解析，0 尺寸需要原图宽高
        let source = match &request.kind {
            GenerationKind::ImageToImage {
                source_image,
                source_width,
                source_height,
                ..
            } => {
                let encoded = source_image
                    .as_deref()
                    .filter(|image| !image.trim().is_empty())
                    .ok_or_else(|| {
                        GenerationError::client("An image attachment is required for img2img.")
                    })?;
                let image = SourceImage::decode(encoded).map_err(|e| {
                    tracing::debug!(error = %e, "Rejected img2img source image");
                    GenerationError::client("The attached image could not be read.")
                })?;
                let original_width = source_width.or(image.size.map(|size| size.width));
                let original_height = source_height.or(image.size.map(|size| size.height));
                Some((image.data, original_width, original_height))
            }
            GenerationKind::TextToImage { .. } => None,
        };
        let (original_width, original_height) = source
            .as_ref()
            .map(|(_, width, height)| (*width, *height))
            .unwrap_or((None, None));

        let max_pixels = resolve_layered([overrides.max_pixels], global.max_pixels);
        let size = self.resolve_size(
            request,
            preferences,
            overrides,
            original_width,
            original_height,
            max_pixels,
            &mut warnings,
        )?;

        let conditioning = self.resolve_conditioning(&request.conditioning, &mut warnings)?;

        let mode = match (&request.kind, source) {
            (
                GenerationKind::TextToImage {
                    hires_factor,
                    hires_steps,
                    hires_denoising,
                },
                _,
            ) => {
                let config = &self.commands.txt2img;
                let factor = pick("Hires factor", *hires_factor, None, &config.hires_factor)?;
                let hires = if factor <= 1.0 {
                    None
                } else if size.scale(factor).pixel_count() > max_pixels {
                    warnings.push("Hires-fix was ignored due to size constraints.".to_string());
                    None
                } else if let Some(unit) = conditioning.iter().find(|u| !u.kind.supports_hires) {
                    warnings.push(format!(
                        "Hires-fix was ignored because ControlNet type {} does not support it.",
                        unit.kind.name
                    ));
                    None
                } else {
                    Some(HiresParams {
                        factor,
                        steps: pick("Hires steps", *hires_steps, None, &config.hires_steps)?,
                        upscaler: config.hires_upscaler.clone(),
                        denoising: pick(
                            "Hires denoising",
                            *hires_denoising,
                            None,
                            &config.hires_denoising,
                        )?,
                    })
                };
                GenerationMode::TextToImage { hires }
            }
            (
                GenerationKind::ImageToImage {
                    denoising_strength,
                    resize_mode,
                    ..
                },
                Some((source_image, _, _)),
            ) => {
                let config = &self.commands.img2img;
                GenerationMode::ImageToImage {
                    source_image,
                    denoising_strength: pick(
                        "Denoising strength",
                        *denoising_strength,
                        None,
                        &config.denoising_strength,
                    )?,
                    resize_mode: resize_mode
                        .or_else(|| ResizeMode::from_index(config.default_resize_mode))
                        .unwrap_or(ResizeMode::Crop),
                }
            }
            (GenerationKind::ImageToImage { .. }, None) => {
                return Err(GenerationError::Internal(
                    "img2img source image was not resolved".to_string(),
                ));
            }
        };

        let params = GenerationParameters {
            mode,
            prompt,
            negative_prompt,
            size,
            count,
            seed,
            sampler,
            steps,
            cfg,
            checkpoint,
            conditioning,
        };
        let display = params.display();

        tracing::debug!(
            user_id = %request.user_id,
            mode = params.mode.as_str(),
            size = %params.size,
            count = params.count,
            warnings = warnings.len(),
            "Generation parameters resolved"
        );

        Ok(ResolvedGeneration {
            params,
            display,
            warnings,
        })
    }

    fn overrides_for(&self, kind: &GenerationKind) -> &CommandOverrides {
        match kind {
            GenerationKind::TextToImage { .. } => &self.commands.txt2img.overrides,
            GenerationKind::ImageToImage { .. } => &self.commands.img2img.overrides,
        }
    }

    /// 期望尺寸 -> 夹到范围 -> 约束到像素预算
    #[allow(clippy::too_many_arguments)]
    fn resolve_size(
        &self,
        request: &GenerationRequest,
        preferences: &UserPreferences,
        overrides: &CommandOverrides,
        original_width: Option<u32>,
        original_height: Option<u32>,
        max_pixels: u64,
        warnings: &mut Vec<String>,
    ) -> Result<Size, GenerationError> {
        let global = &self.commands.global;
        let width_range = effective_range(overrides.width.as_ref(), &global.width);
        let height_range = effective_range(overrides.height.as_ref(), &global.height);

        let width = pick_dimension("Width", request.width, &width_range)?.or(preferences.width);
        let height = pick_dimension("Height", request.height, &height_range)?.or(preferences.height);

        let desired = resolve_desired_size(
            width,
            height,
            original_width,
            original_height,
            width_range.default,
            height_range.default,
        );
        let size = Size::new(
            width_range.clamp(desired.width),
            height_range.clamp(desired.height),
        )
        .constrain(max_pixels);

        // 范围下限把尺寸放大时不提示
        if size.pixel_count() < desired.pixel_count() {
            warnings.push(format!(
                "{} was reduced to {} due to size constraints.",
                desired, size
            ));
        }
        Ok(size)
    }

    /// 未知 checkpoint 回退到第一个已安装项；未配置任何 checkpoint 时原样透传
    fn resolve_checkpoint(
        &self,
        requested: Option<&str>,
        warnings: &mut Vec<String>,
    ) -> Option<Checkpoint> {
        let Some(first) = self.checkpoints.first() else {
            return requested.map(|id| Checkpoint {
                id: id.to_string(),
                name: id.to_string(),
            });
        };

        let checkpoint = match requested {
            Some(id) => match self
                .checkpoints
                .iter()
                .find(|checkpoint| checkpoint.id == id || checkpoint.name == id)
            {
                Some(checkpoint) => checkpoint.clone(),
                None => {
                    warnings.push(format!(
                        "Checkpoint {} is not installed, using {} instead.",
                        id, first.id
                    ));
                    first.clone()
                }
            },
            None => first.clone(),
        };
        Some(checkpoint)
    }

    fn resolve_conditioning(
        &self,
        requests: &[ConditioningRequest],
        warnings: &mut Vec<String>,
    ) -> Result<Vec<ConditioningUnit>, GenerationError> {
        let mut units = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            let number = index + 1;
            let image = match request.image.as_deref().filter(|i| !i.trim().is_empty()) {
                Some(image) => image,
                None if request.kind.is_some() || request.weight.is_some() => {
                    return Err(GenerationError::client(format!(
                        "ControlNet unit {} has a type or weight but no image.",
                        number
                    )));
                }
                None => continue,
            };

            let Some(default_kind) = self.controlnet.installed.first() else {
                return Err(GenerationError::client("ControlNet is not available."));
            };

            let image = SourceImage::decode(image).map_err(|e| {
                tracing::debug!(unit = number, error = %e, "Rejected ControlNet image");
                GenerationError::client(format!(
                    "The image for ControlNet unit {} could not be read.",
                    number
                ))
            })?;

            let kind = match request.kind.as_deref() {
                Some(name) => match self.controlnet.installed.iter().find(|k| k.name == name) {
                    Some(kind) => kind.clone(),
                    None => {
                        warnings.push(format!(
                            "ControlNet type {} is not installed, using {} instead.",
                            name, default_kind.name
                        ));
                        default_kind.clone()
                    }
                },
                None => default_kind.clone(),
            };

            let weight_range = &self.controlnet.weight;
            let weight = weight_range.clamp(
                request
                    .weight
                    .filter(|weight| weight.is_finite())
                    .unwrap_or(weight_range.default),
            );

            units.push(ConditioningUnit {
                image: image.data,
                kind,
                weight,
            });
        }

        Ok(units)
    }
}
