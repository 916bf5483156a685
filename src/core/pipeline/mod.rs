//! Multi-stage content pipeline: per-stage provider fallback with retries,
//! single-flight artifact caching and resumable job state.

mod cache;
mod executor;
pub mod fingerprint;
mod job_store;
mod orchestrator;
mod retry;
mod types;

#[cfg(test)]
mod tests;

pub use cache::{ArtifactCache, CacheProductionFailed, CacheStats};
pub use executor::StageExecutor;
pub use job_store::JobStateStore;
pub use orchestrator::Orchestrator;
pub use retry::BackoffPolicy;
pub use types::{
    ContentRequest, JobError, JobState, JobStatus, JobSummary, ProgressEvent, ResultStatus,
    StageError, StageKind, StageResult, StageState, StageStatus, now_millis, parse_stages,
};
