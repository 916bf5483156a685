use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use super::super::AppState;
use super::error_response;
use crate::core::error::PipelineError;
use crate::core::pipeline::{ContentRequest, JobState, ProgressEvent, StageKind, parse_stages};
use crate::core::provider::Artifact;

#[derive(Debug, serde::Deserialize)]
pub struct SubmitRequest {
    id: Option<String>,
    topic: Option<String>,
    stages: Option<Vec<String>>,
}

pub async fn submit_request(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            return error_response(PipelineError::Input(format!(
                "invalid request body: {}",
                rejection.body_text()
            )));
        }
    };
    let stages = match payload.stages {
        Some(names) => match parse_stages(names.as_slice()) {
            Ok(stages) => stages,
            Err(e) => return error_response(e),
        },
        None => state.orchestrator.settings().default_stages.clone(),
    };
    let request = match ContentRequest::new(payload.id, payload.topic.unwrap_or_default(), stages) {
        Ok(request) => request,
        Err(e) => return error_response(e),
    };

    match state.orchestrator.submit(request) {
        Ok(job) => {
            info!(request_id = %job.request_id, "Content request accepted via API");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "success": true,
                    "requestId": job.request_id,
                    "status": job.status,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn list_requests(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "requests": state.orchestrator.list(),
    }))
}

pub async fn get_request(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.orchestrator.get_status(&id) {
        Some(job) => Json(job).into_response(),
        None => error_response(PipelineError::NotFound(format!("request '{}'", id))),
    }
}

pub async fn cancel_request(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.orchestrator.cancel(&id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_response(e),
    }
}

fn progress_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn snapshot_event(job: &JobState) -> Event {
    Event::default()
        .event("snapshot")
        .json_data(job)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Progress of one request as SSE: the current state first, then every
/// event recorded for it.
pub async fn request_events(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    // Subscribe before reading the snapshot so nothing falls in between.
    let receiver = state.orchestrator.subscribe();
    let Some(job) = state.orchestrator.get_status(&id) else {
        return Err(error_response(PipelineError::NotFound(format!(
            "request '{}'",
            id
        ))));
    };

    let snapshot = tokio_stream::once(Ok(snapshot_event(&job)));
    let updates = BroadcastStream::new(receiver).filter_map(move |msg| match msg {
        Ok(event) if event.request_id() == id => Some(Ok(progress_event(&event))),
        Ok(_) => None,
        Err(_) => Some(Ok(Event::default()
            .event("lagged")
            .data("Progress stream lagged"))),
    });

    Ok(Sse::new(snapshot.chain(updates)).keep_alive(KeepAlive::default()))
}

/// Raw stage output. Text as plain text, audio as bytes with its MIME type
/// (or its hosted URL as JSON), everything else as JSON.
pub async fn get_artifact(
    Path((id, stage)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let Some(stage) = StageKind::parse(&stage) else {
        return error_response(PipelineError::Input(format!(
            "unknown stage kind '{}'",
            stage
        )));
    };
    let result = match state.orchestrator.artifact(&id, stage) {
        Ok(result) => result,
        Err(e) => return error_response(e),
    };

    match &result.payload {
        Artifact::Text { text } => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string())],
            text.clone(),
        )
            .into_response(),
        Artifact::Audio(clip) if clip.bytes.is_empty() => Json(serde_json::json!({
            "success": true,
            "mimeType": clip.mime_type,
            "audioUrl": clip.url,
        }))
        .into_response(),
        Artifact::Audio(clip) => (
            [(header::CONTENT_TYPE, clip.mime_type.clone())],
            clip.bytes.clone(),
        )
            .into_response(),
        Artifact::Images { images } => Json(images).into_response(),
        Artifact::Topics { topics } => Json(topics).into_response(),
        Artifact::Manifest(manifest) => Json(manifest).into_response(),
    }
}
