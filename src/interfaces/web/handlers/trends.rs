use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::error_response;

#[derive(Debug, serde::Deserialize)]
pub struct TrendQuery {
    keyword: Option<String>,
}

/// Suggestions for `?keyword=`, or the latest scheduled snapshot without one.
pub async fn get_trends(Query(query): Query<TrendQuery>, State(state): State<AppState>) -> Response {
    let keyword = query
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let result = match keyword {
        Some(keyword) => state.trends.suggest(Some(keyword)).await,
        None => state.trends.latest_or_fetch().await,
    };

    match result {
        Ok(snapshot) => Json(serde_json::json!({
            "success": true,
            "keyword": snapshot.keyword,
            "topics": snapshot.topics,
            "providerId": snapshot.provider_id,
            "fetchedAt": snapshot.fetched_at,
            "stalenessMs": snapshot.staleness_ms(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}
