//! Generation Handlers
//!
//! 生成请求立即返回 request_id，进度通过 WebSocket 或 status 接口获取

use axum::{extract::State, Json};
use std::sync::Arc;
use uuid::Uuid;

use crate::application::{ApplicationError, GenerationRequest, PendingGeneration};
use crate::infrastructure::events::{EventSnapshot, PublishingObserver};
use crate::infrastructure::http::dto::{
    ApiResponse, CancelResponse, GenerateResponse, Img2ImgRequest, QueueResponse, RequestIdDto,
    Txt2ImgRequest,
};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

pub async fn txt2img(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Txt2ImgRequest>,
) -> Result<Json<ApiResponse<GenerateResponse>>, ApiError> {
    submit(state, req.into()).await
}

pub async fn img2img(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Img2ImgRequest>,
) -> Result<Json<ApiResponse<GenerateResponse>>, ApiError> {
    submit(state, req.into()).await
}

async fn submit(
    state: Arc<AppState>,
    request: GenerationRequest,
) -> Result<Json<ApiResponse<GenerateResponse>>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let observer = Arc::new(PublishingObserver::new(
        request_id.clone(),
        state.event_publisher.clone(),
    ));

    let pending = match state.orchestrator.enqueue(request, observer).await {
        Ok(pending) => pending,
        Err(failure) => {
            // 从未对外暴露的 request_id，不保留快照
            state.event_publisher.release(&request_id);
            return Err(failure.error.into());
        }
    };

    let response = track_generation(&state, request_id, pending);
    Ok(Json(ApiResponse::success(response)))
}

/// 登记已入队的请求，结束后清理
///
/// 终态快照在 `status_retention` 之后移除，status 接口届时返回 404
pub(super) fn track_generation(
    state: &Arc<AppState>,
    request_id: String,
    pending: PendingGeneration,
) -> GenerateResponse {
    let task_id = pending.task_id;
    let display = pending.display.clone();
    state.pending.insert(request_id.clone(), task_id);
    let position = state.queue.position_of(task_id);

    tracing::info!(
        request_id = %request_id,
        task_id = %task_id,
        position = ?position,
        "Generation request accepted"
    );

    let state_for_cleanup = state.clone();
    let request_id_for_cleanup = request_id.clone();
    tokio::spawn(async move {
        let outcome = pending.outcome().await;
        state_for_cleanup.pending.remove(&request_id_for_cleanup);
        tracing::debug!(
            request_id = %request_id_for_cleanup,
            success = outcome.is_success(),
            "Generation request finished"
        );

        tokio::time::sleep(state_for_cleanup.status_retention).await;
        state_for_cleanup
            .event_publisher
            .release(&request_id_for_cleanup);
    });

    GenerateResponse {
        request_id,
        task_id: task_id.as_u64(),
        position,
        display,
    }
}

/// 最新状态事件
pub async fn generation_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequestIdDto>,
) -> Result<Json<ApiResponse<EventSnapshot>>, ApiError> {
    let snapshot = state
        .event_publisher
        .latest(&req.request_id)
        .ok_or_else(|| ApplicationError::not_found("Request", &req.request_id))?;

    Ok(Json(ApiResponse::success(snapshot)))
}

/// 取消排队中的请求，正在执行的请求返回 cancelled = false
pub async fn cancel_generation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequestIdDto>,
) -> Result<Json<ApiResponse<CancelResponse>>, ApiError> {
    let task_id = state
        .pending
        .get(&req.request_id)
        .map(|entry| *entry.value())
        .ok_or_else(|| ApplicationError::not_found("Request", &req.request_id))?;

    let cancelled = state.orchestrator.cancel(task_id).await;
    tracing::info!(request_id = %req.request_id, cancelled, "Cancel requested");

    Ok(Json(ApiResponse::success(CancelResponse { cancelled })))
}

pub async fn queue_status(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<QueueResponse>> {
    Json(ApiResponse::success(QueueResponse {
        length: state.queue.len(),
        last_active_class: state.queue.last_active_class().map(|c| c.as_str()),
    }))
}
