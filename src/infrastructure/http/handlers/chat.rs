//! Chat Completion Handler

use axum::{extract::State, Json};
use std::sync::Arc;
use uuid::Uuid;

use super::generation::track_generation;
use crate::application::FollowUpGeneration;
use crate::infrastructure::events::PublishingObserver;
use crate::infrastructure::http::dto::{
    ApiResponse, ChatCompletionRequestDto, ChatCompletionResponseDto,
};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

/// 等待队列执行完毕后返回补全文本
///
/// 图片动作追加的生成请求使用新的 request_id，与 txt2img 一样通过 status 或 WebSocket 跟踪
pub async fn chat_completion(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionRequestDto>,
) -> Result<Json<ApiResponse<ChatCompletionResponseDto>>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let observer = Arc::new(PublishingObserver::new(
        request_id.clone(),
        state.event_publisher.clone(),
    ));

    let response = match state
        .chat_handler
        .handle_with_observer(req.into(), observer)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            state.event_publisher.release(&request_id);
            return Err(e.into());
        }
    };

    let (generation, generation_error) = match response.generation {
        Some(FollowUpGeneration::Queued(pending)) => {
            (Some(track_generation(&state, request_id, pending)), None)
        }
        Some(FollowUpGeneration::Rejected(failure)) => {
            state.event_publisher.release(&request_id);
            (None, Some(failure.error.user_message()))
        }
        None => {
            state.event_publisher.release(&request_id);
            (None, None)
        }
    };

    Ok(Json(ApiResponse::success(ChatCompletionResponseDto {
        text: response.text,
        action: response.action,
        generation,
        generation_error,
    })))
}
