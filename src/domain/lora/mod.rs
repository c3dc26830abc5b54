//! LoRA Context - 已安装的 LoRA 目录
//!
//! 目录按 nsfw 标记分成两份，互不可见

mod catalog;

pub use catalog::{Lora, LoraCatalog, RecommendedWeights};
