//! Easel - 图片生成聊天机器人后端
//!
//! - Domain: generation/, preferences/, chat/, lora/
//! - Application: queue, commands, queries, ports
//! - Infrastructure: http, adapters, events

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use easel::application::{
    ChatCompletionHandler, ExecutionQueue, GenerationOrchestrator, ParameterResolver,
    PreferencesHandler, TextBackendPort,
};
use easel::config::{load_config, print_config, LogConfig};
use easel::domain::lora::LoraCatalog;
use easel::infrastructure::adapters::{
    FilePreferenceStore, HttpSdClient, HttpSdClientConfig, HttpTgClient, HttpTgClientConfig,
};
use easel::infrastructure::events::EventPublisher;
use easel::infrastructure::http::{AppState, HttpServer, ServerConfig};

fn init_tracing(log: &LogConfig) {
    let log_filter = format!("{},easel={},tower_http=debug", log.level, log.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter));

    let fmt_layer = if log.json {
        tracing_subscriber::fmt::layer().json().with_target(true).boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    init_tracing(&config.log);
    tracing::info!("Easel - image generation backend");
    print_config(&config);

    // 偏好存储
    let preference_store = Arc::new(FilePreferenceStore::new(&config.storage.preferences_dir).await?);

    // 后端客户端
    let sd_config = HttpSdClientConfig::new(&config.sd.url).with_timeout(config.sd.timeout_secs);
    let image_backend = Arc::new(HttpSdClient::new(sd_config)?);

    let text_backend: Option<Arc<dyn TextBackendPort>> = match &config.tg.url {
        Some(url) => {
            let tg_config = HttpTgClientConfig::new(url, config.tg.timeout_secs);
            Some(Arc::new(HttpTgClient::new(tg_config)?))
        }
        None => None,
    };

    // 整个进程只有一个执行队列，图片与文本任务共享
    let queue = ExecutionQueue::new();
    let event_publisher = EventPublisher::new().arc();

    let resolver = Arc::new(ParameterResolver::new(
        config.commands.clone(),
        config.checkpoints.clone(),
        config.controlnet.clone(),
        preference_store.clone(),
    ));
    let orchestrator = Arc::new(GenerationOrchestrator::new(
        resolver,
        queue.clone(),
        image_backend,
        text_backend.clone(),
    ));
    let preferences_handler = PreferencesHandler::new(
        preference_store,
        config.commands.global.clone(),
        config.checkpoints.clone(),
    );
    let chat_handler = ChatCompletionHandler::new(
        queue.clone(),
        text_backend,
        config.tg.model.clone(),
        config.tg.max_tokens,
    )
    .with_bot_name(config.tg.bot_name.clone())
    .with_image_generation(orchestrator.clone(), config.checkpoints.installed.clone());
    let lora_catalog = Arc::new(LoraCatalog::new(
        config.lora.tags.clone(),
        config.lora.installed.clone(),
    ));

    let state = AppState::new(
        queue,
        event_publisher,
        orchestrator,
        preferences_handler,
        chat_handler,
        lora_catalog,
    )
    .with_status_retention(Duration::from_secs(config.server.status_retention_secs));

    let server_config = ServerConfig::new(&config.server.host, config.server.port);
    let server = HttpServer::new(server_config, state);

    tracing::info!("Starting HTTP server...");

    // 启动服务器（带优雅关闭）
    server
        .run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                return;
            }
            tracing::info!("Received shutdown signal");
        })
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
