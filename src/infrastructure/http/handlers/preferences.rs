//! Preferences Handler

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::domain::preferences::UserPreferences;
use crate::infrastructure::http::dto::{ApiResponse, PreferencesRequest};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

pub async fn preferences(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PreferencesRequest>,
) -> Result<Json<ApiResponse<UserPreferences>>, ApiError> {
    if req.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }

    let prefs = state
        .preferences_handler
        .handle(&req.user_id, req.command.into())
        .await?;

    Ok(Json(ApiResponse::success(prefs)))
}
