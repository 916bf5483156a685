pub mod cache;
pub mod providers;
pub mod requests;
pub mod trends;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::core::error::PipelineError;

pub(crate) fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Input(_) => StatusCode::BAD_REQUEST,
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::Cancelled(_) => StatusCode::CONFLICT,
        PipelineError::StageTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::ProviderTransient { .. }
        | PipelineError::ProviderPermanent { .. }
        | PipelineError::AllProvidersExhausted { .. }
        | PipelineError::CacheProductionFailed(_) => StatusCode::BAD_GATEWAY,
    }
}

/// `{success: false, error, code}` with the status matching the error class.
pub(crate) fn error_response(err: PipelineError) -> Response {
    (
        status_for(&err),
        Json(serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "code": err.code(),
        })),
    )
        .into_response()
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
