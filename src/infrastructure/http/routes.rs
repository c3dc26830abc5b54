//! HTTP Routes
//!
//! API Endpoints:
//! - /api/ping                  GET   健康检查
//! - /api/generate/txt2img      POST  提交文生图请求，返回 request_id
//! - /api/generate/img2img      POST  提交图生图请求，返回 request_id
//! - /api/generate/status       POST  查询请求的最新状态事件
//! - /api/generate/cancel       POST  取消排队中的请求
//! - /api/queue                 GET   队列长度与最近的资源类别
//! - /api/preferences           POST  用户偏好子命令（list/set/reset/clear）
//! - /api/chat/completions      POST  对话补全（排队执行，等待结果；可追加生成请求）
//! - /api/loras/list            POST  列出 LoRA（按标签过滤或搜索）
//! - /api/loras/info            POST  LoRA 详情与激活键
//! - /ws/generation/{id}        WS    生成请求的状态事件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

/// 创建所有路由
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", api_routes())
        .route(
            "/ws/generation/:request_id",
            get(handlers::generation_websocket_handler),
        )
}

/// API 路由
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .nest("/generate", generate_routes())
        .route("/queue", get(handlers::queue_status))
        .route("/preferences", post(handlers::preferences))
        .route("/chat/completions", post(handlers::chat_completion))
        .nest("/loras", lora_routes())
}

/// LoRA 路由
fn lora_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/list", post(handlers::list_loras))
        .route("/info", post(handlers::lora_info))
}

/// Generation 路由
fn generate_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/txt2img", post(handlers::txt2img))
        .route("/img2img", post(handlers::img2img))
        .route("/status", post(handlers::generation_status))
        .route("/cancel", post(handlers::cancel_generation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{
        BackendError, ChatCompletionHandler, ChatCompletionRequest, ExecutionQueue,
        GenerationOrchestrator, ImageBackendPort, ImageGenerationResult, ParameterResolver,
        PreferencesHandler, TextBackendPort,
    };
    use crate::config::AppConfig;
    use crate::domain::generation::GenerationParameters;
    use crate::domain::lora::{Lora, LoraCatalog, RecommendedWeights};
    use crate::infrastructure::adapters::FilePreferenceStore;
    use crate::infrastructure::events::EventPublisher;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::Semaphore;
    use tower::util::ServiceExt;

    /// 每次生成消耗一个许可
    struct GatedBackend {
        permits: Arc<Semaphore>,
    }

    #[async_trait]
    impl ImageBackendPort for GatedBackend {
        async fn generate(
            &self,
            _params: &GenerationParameters,
        ) -> Result<ImageGenerationResult, BackendError> {
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| BackendError::NetworkError(e.to_string()))?;
            permit.forget();
            Ok(ImageGenerationResult {
                images: vec!["IMG".to_string()],
            })
        }
    }

    /// 动作选择回答 GENERATE_IMAGE，参数提取回答固定的 prompt
    struct DrawingTextBackend;

    #[async_trait]
    impl TextBackendPort for DrawingTextBackend {
        async fn load_model(&self, _name: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn unload_model(&self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn chat_completion(
            &self,
            request: &ChatCompletionRequest,
        ) -> Result<String, BackendError> {
            let last = request.messages.last().map(|m| m.content.as_str());
            Ok(match last {
                Some("action=") => "GENERATE_IMAGE".to_string(),
                Some("| prompt=") => "a fox | seed=5".to_string(),
                _ => "Drawing it now!".to_string(),
            })
        }
    }

    struct TestApp {
        router: Router,
        state: Arc<AppState>,
        permits: Arc<Semaphore>,
        _dir: TempDir,
    }

    fn lora_catalog() -> Arc<LoraCatalog> {
        let fox = Lora {
            id: "fox".to_string(),
            name: "Fox Ears".to_string(),
            url: Some("https://example.com/fox".to_string()),
            thumbnail_url: None,
            nsfw: false,
            recommended_weights: Some(RecommendedWeights {
                low: None,
                high: Some(1.0),
                default: Some(0.7),
            }),
            keywords: vec!["fox ears".to_string()],
            tags: vec!["animal".to_string()],
        };
        let ink = Lora {
            id: "ink".to_string(),
            name: "Ink Wash".to_string(),
            recommended_weights: None,
            keywords: Vec::new(),
            tags: vec!["style".to_string()],
            ..fox.clone()
        };
        let hidden = Lora {
            id: "hidden".to_string(),
            nsfw: true,
            ..ink.clone()
        };
        Arc::new(LoraCatalog::new(
            vec!["animal".to_string(), "style".to_string()],
            vec![fox, ink, hidden],
        ))
    }

    async fn test_app() -> TestApp {
        test_app_with(None, Duration::from_secs(600)).await
    }

    async fn test_app_with(
        text_backend: Option<Arc<dyn TextBackendPort>>,
        status_retention: Duration,
    ) -> TestApp {
        let dir = tempdir().unwrap();
        let config = AppConfig::default();
        let store = Arc::new(FilePreferenceStore::new(dir.path()).await.unwrap());
        let permits = Arc::new(Semaphore::new(0));
        let queue = ExecutionQueue::new();

        let resolver = Arc::new(ParameterResolver::new(
            config.commands.clone(),
            config.checkpoints.clone(),
            config.controlnet.clone(),
            store.clone(),
        ));
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            resolver,
            queue.clone(),
            Arc::new(GatedBackend {
                permits: permits.clone(),
            }),
            text_backend.clone(),
        ));
        let chat_handler = ChatCompletionHandler::new(queue.clone(), text_backend, "", None)
            .with_image_generation(orchestrator.clone(), config.checkpoints.installed.clone());
        let state = AppState::new(
            queue,
            EventPublisher::new().arc(),
            orchestrator,
            PreferencesHandler::new(
                store,
                config.commands.global.clone(),
                config.checkpoints.clone(),
            ),
            chat_handler,
            lora_catalog(),
        )
        .with_status_retention(status_retention);
        let state = Arc::new(state);

        TestApp {
            router: create_routes().with_state(state.clone()),
            state,
            permits,
            _dir: dir,
        }
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Value {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_for_event(app: &TestApp, request_id: &str, event: &str) -> Value {
        for _ in 0..200 {
            if let Some(snapshot) = app.state.event_publisher.latest(request_id) {
                let value = serde_json::to_value(&snapshot).unwrap();
                if value["event"] == event {
                    return value;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("event {} never published for {}", event, request_id);
    }

    #[tokio::test]
    async fn test_ping() {
        let app = test_app().await;
        let body = call(&app.router, "GET", "/api/ping", None).await;
        assert_eq!(body["errno"], 0);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["queue_length"], 0);
    }

    #[tokio::test]
    async fn test_client_error_is_answered_immediately() {
        let app = test_app().await;
        let body = call(
            &app.router,
            "POST",
            "/api/generate/txt2img",
            Some(json!({"prompt": "cat", "steps": 1000})),
        )
        .await;

        assert_eq!(body["errno"], 400);
        assert_eq!(body["error"], "Steps must be between 1 and 40.");
        assert!(app.state.queue.is_empty());
        assert_eq!(app.state.event_publisher.tracked_requests(), 0);

        let body = call(
            &app.router,
            "POST",
            "/api/generate/img2img",
            Some(json!({"prompt": "cat"})),
        )
        .await;
        assert_eq!(body["errno"], 400);
    }

    #[tokio::test]
    async fn test_txt2img_success_and_status() {
        let app = test_app().await;
        app.permits.add_permits(1);

        let body = call(
            &app.router,
            "POST",
            "/api/generate/txt2img",
            Some(json!({"prompt": "cat", "seed": 7})),
        )
        .await;
        assert_eq!(body["errno"], 0);
        let request_id = body["data"]["request_id"].as_str().unwrap().to_string();

        let event = wait_for_event(&app, &request_id, "GenerationSucceeded").await;
        assert_eq!(event["data"]["seed"], 7);
        assert_eq!(event["data"]["images"][0]["data"], "IMG");

        let status = call(
            &app.router,
            "POST",
            "/api/generate/status",
            Some(json!({"request_id": request_id})),
        )
        .await;
        assert_eq!(status["data"]["event"], "GenerationSucceeded");
        assert!(status["data"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_cancel_waiting_request() {
        let app = test_app().await;

        let first = call(
            &app.router,
            "POST",
            "/api/generate/txt2img",
            Some(json!({"prompt": "first"})),
        )
        .await;
        let second = call(
            &app.router,
            "POST",
            "/api/generate/txt2img",
            Some(json!({"prompt": "second"})),
        )
        .await;
        assert_eq!(second["data"]["position"], 1);
        let first_id = first["data"]["request_id"].as_str().unwrap().to_string();
        let second_id = second["data"]["request_id"].as_str().unwrap().to_string();

        let queue = call(&app.router, "GET", "/api/queue", None).await;
        assert_eq!(queue["data"]["length"], 2);

        let cancelled = call(
            &app.router,
            "POST",
            "/api/generate/cancel",
            Some(json!({"request_id": second_id})),
        )
        .await;
        assert_eq!(cancelled["data"]["cancelled"], true);
        let event = wait_for_event(&app, &second_id, "GenerationFailed").await;
        assert_eq!(event["data"]["error"], "The request was cancelled.");

        // 正在执行的请求不能取消
        let running = call(
            &app.router,
            "POST",
            "/api/generate/cancel",
            Some(json!({"request_id": first_id})),
        )
        .await;
        assert_eq!(running["data"]["cancelled"], false);

        app.permits.add_permits(1);
        wait_for_event(&app, &first_id, "GenerationSucceeded").await;

        let unknown = call(
            &app.router,
            "POST",
            "/api/generate/cancel",
            Some(json!({"request_id": "nope"})),
        )
        .await;
        assert_eq!(unknown["errno"], 404);
    }

    #[tokio::test]
    async fn test_preferences_round_trip() {
        let app = test_app().await;
        let set = call(
            &app.router,
            "POST",
            "/api/preferences",
            Some(json!({"user_id": "u1", "command": {"action": "set", "fields": {"steps": 30}}})),
        )
        .await;
        assert_eq!(set["data"]["steps"], 30);

        let list = call(
            &app.router,
            "POST",
            "/api/preferences",
            Some(json!({"user_id": "u1", "command": {"action": "list"}})),
        )
        .await;
        assert_eq!(list["data"], json!({"steps": 30}));

        let invalid = call(
            &app.router,
            "POST",
            "/api/preferences",
            Some(json!({"user_id": "u1", "command": {"action": "set", "fields": {"cfg": 99.0}}})),
        )
        .await;
        assert_eq!(invalid["errno"], 400);
    }

    #[tokio::test]
    async fn test_chat_without_text_backend() {
        let app = test_app().await;
        let body = call(
            &app.router,
            "POST",
            "/api/chat/completions",
            Some(json!({"messages": [{"role": "user", "content": "hi"}]})),
        )
        .await;
        assert_eq!(body["errno"], 502);
    }

    #[tokio::test]
    async fn test_status_is_evicted_after_retention() {
        let app = test_app_with(None, Duration::ZERO).await;
        app.permits.add_permits(1);

        let body = call(
            &app.router,
            "POST",
            "/api/generate/txt2img",
            Some(json!({"prompt": "cat"})),
        )
        .await;
        let request_id = body["data"]["request_id"].as_str().unwrap().to_string();

        let mut errno = Value::Null;
        for _ in 0..200 {
            let status = call(
                &app.router,
                "POST",
                "/api/generate/status",
                Some(json!({"request_id": request_id})),
            )
            .await;
            errno = status["errno"].clone();
            if errno == 404 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(errno, 404);
        assert_eq!(app.state.event_publisher.tracked_requests(), 0);
        assert!(app.state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_chat_action_queues_generation() {
        let app = test_app_with(Some(Arc::new(DrawingTextBackend)), Duration::from_secs(600)).await;

        let body = call(
            &app.router,
            "POST",
            "/api/chat/completions",
            Some(json!({
                "user_id": "u1",
                "actions": true,
                "messages": [{"role": "user", "content": "draw me a fox"}]
            })),
        )
        .await;

        assert_eq!(body["errno"], 0);
        assert_eq!(body["data"]["text"], "Drawing it now!");
        assert_eq!(body["data"]["action"], "generate_image");
        assert!(body["data"].get("generation_error").is_none());
        let request_id = body["data"]["generation"]["request_id"]
            .as_str()
            .unwrap()
            .to_string();

        app.permits.add_permits(1);
        let event = wait_for_event(&app, &request_id, "GenerationSucceeded").await;
        assert_eq!(event["data"]["seed"], 5);
    }

    #[tokio::test]
    async fn test_lora_list_and_info() {
        let app = test_app().await;

        let list = call(&app.router, "POST", "/api/loras/list", Some(json!({}))).await;
        assert_eq!(list["errno"], 0);
        assert_eq!(list["data"]["loras"].as_array().unwrap().len(), 2);
        assert_eq!(list["data"]["tags"], json!(["animal", "style"]));

        let styles = call(
            &app.router,
            "POST",
            "/api/loras/list",
            Some(json!({"tag": "style"})),
        )
        .await;
        assert_eq!(styles["data"]["loras"][0]["id"], "ink");

        let info = call(
            &app.router,
            "POST",
            "/api/loras/info",
            Some(json!({"id": "fox"})),
        )
        .await;
        assert_eq!(info["data"]["activation_key"], "<lora:fox:0.7>");
        assert_eq!(info["data"]["weight_hint"], "1.0 or lower");
        assert_eq!(info["data"]["keywords"], json!(["fox ears"]));

        let hidden = call(
            &app.router,
            "POST",
            "/api/loras/info",
            Some(json!({"id": "hidden"})),
        )
        .await;
        assert_eq!(hidden["errno"], 404);
    }
}
