//! HTTP Layer - RESTful API + WebSocket
//!
//! 代替聊天平台的命令层：提交生成请求、查询进度、偏好与对话补全

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use routes::create_routes;
pub use server::{HttpServer, ServerConfig};
pub use state::AppState;
