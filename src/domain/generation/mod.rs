//! Generation Context - 生成参数
//!
//! 尺寸约束、提示词合并、分层取值与解析后的生成参数

mod prompt;
mod source_image;
mod size;
mod value_objects;
mod value_range;

pub use prompt::merge_prefix;
pub use size::{resolve_desired_size, Size};
pub use source_image::{SourceImage, SourceImageError};

#[cfg(test)]
pub(crate) use source_image::tests::png_base64;
pub use value_objects::{
    Checkpoint, ConditioningParams, ConditioningType, ConditioningUnit, DisplayEntry,
    DisplayParameters, GenerationMode, GenerationParameters, HiresParams, ResizeMode,
};
pub use value_range::{
    effective_range, first_present, resolve_layered, PartialValueRange, ValueRange,
};
