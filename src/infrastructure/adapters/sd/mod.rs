//! SD Adapter - 图片后端 HTTP 客户端

mod http_sd_client;

pub use http_sd_client::{HttpSdClient, HttpSdClientConfig};
