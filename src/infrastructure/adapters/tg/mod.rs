//! TG Adapter - 文本后端 HTTP 客户端

mod http_tg_client;

pub use http_tg_client::{HttpTgClient, HttpTgClientConfig};
