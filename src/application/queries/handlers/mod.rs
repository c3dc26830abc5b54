//! Query Handlers 实现

mod lora_handlers;

pub use lora_handlers::*;
