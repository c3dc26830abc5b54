//! HTTP Handlers

mod chat;
mod generation;
mod lora;
mod ping;
mod preferences;
mod websocket;

pub use chat::*;
pub use generation::*;
pub use lora::*;
pub use ping::*;
pub use preferences::*;
pub use websocket::*;
