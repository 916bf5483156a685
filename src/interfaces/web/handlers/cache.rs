use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use tracing::info;

use super::super::AppState;
use super::error_response;
use crate::core::error::PipelineError;

pub async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "stats": state.orchestrator.cache().stats(),
    }))
}

pub async fn invalidate_entry(
    Path(fingerprint): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if !state.orchestrator.invalidate(&fingerprint) {
        return error_response(PipelineError::NotFound(format!(
            "cache entry '{}'",
            fingerprint
        )));
    }
    info!(fingerprint = %fingerprint, "Cache entry invalidated via API");
    Json(serde_json::json!({ "success": true, "fingerprint": fingerprint })).into_response()
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.orchestrator.cache().invalidate_all();
    info!(removed, "Cache cleared via API");
    Json(serde_json::json!({ "success": true, "removed": removed }))
}
