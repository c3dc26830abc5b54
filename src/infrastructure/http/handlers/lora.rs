//! LoRA Handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::infrastructure::http::dto::{
    ApiResponse, GetLoraRequest, ListLorasRequest, LoraInfoResponseDto, LoraListResponseDto,
};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

/// 列出 LoRA，可按标签过滤或按关键词搜索
pub async fn list_loras(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListLorasRequest>,
) -> Result<Json<ApiResponse<LoraListResponseDto>>, ApiError> {
    let response = state.list_loras_handler.handle(req.into()).await?;
    Ok(Json(ApiResponse::success(response.into())))
}

pub async fn lora_info(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetLoraRequest>,
) -> Result<Json<ApiResponse<LoraInfoResponseDto>>, ApiError> {
    let response = state.get_lora_handler.handle(req.into()).await?;
    Ok(Json(ApiResponse::success(response.into())))
}
