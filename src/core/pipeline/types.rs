use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::PipelineError;
use crate::core::provider::{Artifact, CapabilityKind, ProviderError};

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One pipeline step. Each stage is served by exactly one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Script,
    Voice,
    Visuals,
    Assembly,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Script,
        StageKind::Voice,
        StageKind::Visuals,
        StageKind::Assembly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Script => "script",
            StageKind::Voice => "voice",
            StageKind::Visuals => "visuals",
            StageKind::Assembly => "assembly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "script" => Some(StageKind::Script),
            "voice" => Some(StageKind::Voice),
            "visuals" => Some(StageKind::Visuals),
            "assembly" => Some(StageKind::Assembly),
            _ => None,
        }
    }

    pub fn capability(self) -> CapabilityKind {
        match self {
            StageKind::Script => CapabilityKind::Script,
            StageKind::Voice => CapabilityKind::Voice,
            StageKind::Visuals => CapabilityKind::Visuals,
            StageKind::Assembly => CapabilityKind::Assembly,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Succeeded,
}

/// A unit of work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRequest {
    pub id: String,
    pub topic: String,
    pub stages: Vec<StageKind>,
}

impl ContentRequest {
    /// Validate and build a request. A missing id gets a fresh UUID.
    pub fn new(
        id: Option<String>,
        topic: impl Into<String>,
        stages: Vec<StageKind>,
    ) -> Result<Self, PipelineError> {
        let id = match id.map(|s| s.trim().to_string()) {
            Some(id) if id.is_empty() => {
                return Err(PipelineError::Input("request id must not be blank".into()));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let request = Self {
            id,
            topic: topic.into().trim().to_string(),
            stages,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.topic.is_empty() {
            return Err(PipelineError::Input("topic must not be empty".into()));
        }
        if self.stages.is_empty() {
            return Err(PipelineError::Input("at least one stage is required".into()));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].contains(stage) {
                return Err(PipelineError::Input(format!(
                    "stage '{}' is requested more than once",
                    stage
                )));
            }
        }
        Ok(())
    }
}

/// Parse stage names as given by a client. Unknown names are input errors.
pub fn parse_stages<S: AsRef<str>>(names: &[S]) -> Result<Vec<StageKind>, PipelineError> {
    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            StageKind::parse(name)
                .ok_or_else(|| PipelineError::Input(format!("unknown stage kind '{}'", name)))
        })
        .collect()
}

/// Output of one stage, shared by the cache and the job state store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    #[serde(rename = "stageKind")]
    pub capability: CapabilityKind,
    pub provider_id: String,
    pub fingerprint: String,
    pub payload: Artifact,
    pub produced_at: u64,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

impl StageError {
    pub fn from_provider(provider_id: &str, err: &ProviderError) -> Self {
        Self {
            code: err.class().to_string(),
            message: err.message().to_string(),
            provider_id: Some(provider_id.to_string()),
        }
    }
}

impl From<&PipelineError> for StageError {
    fn from(err: &PipelineError) -> Self {
        let provider_id = match err {
            PipelineError::ProviderTransient { provider_id, .. }
            | PipelineError::ProviderPermanent { provider_id, .. } => Some(provider_id.clone()),
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            provider_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    pub kind: StageKind,
    pub status: StageStatus,
    pub attempts: u32,
    pub provider_id: Option<String>,
    pub last_error: Option<StageError>,
    pub result: Option<Arc<StageResult>>,
    pub updated_at: u64,
}

impl StageState {
    fn pending(kind: StageKind, at: u64) -> Self {
        Self {
            kind,
            status: StageStatus::Pending,
            attempts: 0,
            provider_id: None,
            last_error: None,
            result: None,
            updated_at: at,
        }
    }

    /// Back to pending, keeping nothing from the previous run.
    pub(crate) fn reset(&mut self, at: u64) {
        *self = Self::pending(self.kind, at);
    }
}

/// Structured error of the stage that failed a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub stage: StageKind,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub request_id: String,
    pub topic: String,
    pub status: JobStatus,
    pub stages: Vec<StageState>,
    pub error: Option<JobError>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl JobState {
    pub fn new(request: &ContentRequest) -> Self {
        let now = now_millis();
        Self {
            request_id: request.id.clone(),
            topic: request.topic.clone(),
            status: JobStatus::Running,
            stages: request
                .stages
                .iter()
                .map(|kind| StageState::pending(*kind, now))
                .collect(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageState> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub(crate) fn stage_mut(&mut self, kind: StageKind) -> Option<&mut StageState> {
        self.stages.iter_mut().find(|s| s.kind == kind)
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `request` describes the same work as this job.
    pub fn matches(&self, request: &ContentRequest) -> bool {
        self.topic == request.topic && self.stage_kinds() == request.stages
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            request_id: self.request_id.clone(),
            topic: self.topic.clone(),
            status: self.status,
            completed_stages: self
                .stages
                .iter()
                .filter(|s| s.status == StageStatus::Succeeded)
                .count(),
            total_stages: self.stages.len(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub request_id: String,
    pub topic: String,
    pub status: JobStatus,
    pub completed_stages: usize,
    pub total_stages: usize,
    pub updated_at: u64,
}

/// A job state mutation, pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Job {
        request_id: String,
        status: JobStatus,
        at: u64,
    },
    Stage {
        request_id: String,
        stage: StageKind,
        status: StageStatus,
        attempts: u32,
        provider_id: Option<String>,
        at: u64,
    },
    Attempt {
        request_id: String,
        stage: StageKind,
        provider_id: String,
        attempt: u32,
        error: Option<StageError>,
        at: u64,
    },
}

impl ProgressEvent {
    pub fn request_id(&self) -> &str {
        match self {
            ProgressEvent::Job { request_id, .. }
            | ProgressEvent::Stage { request_id, .. }
            | ProgressEvent::Attempt { request_id, .. } => request_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Job { .. } => "job",
            ProgressEvent::Stage { .. } => "stage",
            ProgressEvent::Attempt { .. } => "attempt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_result_json_names_the_stage_kind() {
        let result = StageResult {
            capability: CapabilityKind::Script,
            provider_id: "gemini".into(),
            fingerprint: "ab12".into(),
            payload: Artifact::text("Hello."),
            produced_at: 7,
            status: ResultStatus::Succeeded,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stageKind"], "script");
        assert_eq!(json["providerId"], "gemini");
        assert_eq!(json["status"], "succeeded");
        assert!(json.get("capability").is_none());
    }

    #[test]
    fn request_validation_rejects_bad_input() {
        assert!(ContentRequest::new(None, "   ", vec![StageKind::Script]).is_err());
        assert!(ContentRequest::new(None, "cats", vec![]).is_err());
        assert!(
            ContentRequest::new(None, "cats", vec![StageKind::Script, StageKind::Script]).is_err()
        );
        assert!(ContentRequest::new(Some(" ".into()), "cats", vec![StageKind::Script]).is_err());

        let req = ContentRequest::new(None, "  cats ", vec![StageKind::Script]).unwrap();
        assert_eq!(req.topic, "cats");
        assert!(uuid::Uuid::parse_str(&req.id).is_ok());
    }

    #[test]
    fn stage_names_parse_case_insensitively() {
        assert_eq!(
            parse_stages(&["Script", "voice"]).unwrap(),
            vec![StageKind::Script, StageKind::Voice]
        );
        let err = parse_stages(&["script", "dance"]).unwrap_err();
        assert_eq!(err.code(), "input_error");
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn progress_events_serialize_tagged_camel_case() {
        let ev = ProgressEvent::Stage {
            request_id: "r1".into(),
            stage: StageKind::Voice,
            status: StageStatus::Running,
            attempts: 0,
            provider_id: None,
            at: 1,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "stage");
        assert_eq!(json["requestId"], "r1");
        assert_eq!(json["stage"], "voice");
    }
}
