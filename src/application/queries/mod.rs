//! 应用层 - 查询（读操作）
//!
//! 目前只有 LoRA 目录的查询

mod lora_queries;

pub mod handlers;

pub use lora_queries::*;
