use axum::{Json, extract::State};

use super::super::AppState;

/// Configured providers in priority order per capability. Credentials are
/// reported only as present or missing.
pub async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers: Vec<serde_json::Value> = state
        .registry
        .list()
        .iter()
        .map(|p| {
            let cfg = &p.config;
            serde_json::json!({
                "id": cfg.id,
                "capability": cfg.capability,
                "adapter": cfg.adapter,
                "priority": cfg.priority,
                "timeoutMs": cfg.timeout_ms,
                "maxRetries": cfg.max_retries,
                "maxEmptyRetries": cfg.empty_result_budget(),
                "model": cfg.model,
                "voice": cfg.voice,
                "hasCredentials": cfg.credentials.api_key().is_some(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "success": true,
        "providers": providers,
    }))
}
