use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::cache::ArtifactCache;
use super::executor::StageExecutor;
use super::job_store::JobStateStore;
use super::retry::BackoffPolicy;
use super::types::{
    ContentRequest, JobError, JobState, JobStatus, JobSummary, ProgressEvent, StageError,
    StageKind, StageResult, StageStatus,
};
use crate::core::config::PipelineSettings;
use crate::core::error::PipelineError;
use crate::core::provider::{ProviderInput, ProviderRegistry};

/// Cancellation handle of one run of a request. Each submit that starts a
/// task gets a fresh generation.
#[derive(Clone)]
struct RunHandle {
    generation: u64,
    token: CancellationToken,
}

/// Sequences the stages of content requests. Requests run concurrently, each
/// on its own task; stages within a request run strictly in order.
#[derive(Clone)]
pub struct Orchestrator {
    executor: StageExecutor,
    jobs: JobStateStore,
    cache: ArtifactCache,
    settings: PipelineSettings,
    runs: Arc<DashMap<String, RunHandle>>,
    generations: Arc<AtomicU64>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, settings: PipelineSettings) -> Self {
        Self::with_backoff(registry, settings, BackoffPolicy::default())
    }

    pub fn with_backoff(
        registry: Arc<ProviderRegistry>,
        settings: PipelineSettings,
        backoff: BackoffPolicy,
    ) -> Self {
        let jobs = JobStateStore::new(settings.progress_buffer);
        let cache = ArtifactCache::new();
        let executor = StageExecutor::new(registry, cache.clone(), jobs.clone(), backoff);
        Self {
            executor,
            jobs,
            cache,
            settings,
            runs: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Accept a request and start its pipeline in the background.
    ///
    /// Resubmitting a known id is idempotent: a running or completed job is
    /// returned as is, while a failed or cancelled one resumes from its first
    /// stage that did not succeed.
    pub fn submit(&self, request: ContentRequest) -> Result<JobState, PipelineError> {
        request.validate()?;

        // The slot stays locked until the new run's handle is in place, so a
        // cancel never observes a running job without its token.
        let slot = self.runs.entry(request.id.clone());
        let (job, created) = self.jobs.create_if_absent(&request);
        let job = if created {
            info!(request_id = %request.id, topic = %request.topic, "Accepted content request");
            job
        } else {
            if !job.matches(&request) {
                return Err(PipelineError::Input(format!(
                    "request '{}' already exists with a different topic or stage list",
                    request.id
                )));
            }
            match self.jobs.reopen(&request.id) {
                Some(reopened) => {
                    info!(request_id = %request.id, "Resuming content request");
                    reopened
                }
                None => return Ok(job),
            }
        };

        let run = RunHandle {
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        };
        drop(slot.insert(run.clone()));

        let this = self.clone();
        tokio::spawn(async move {
            this.run_pipeline(request, run).await;
        });
        Ok(job)
    }

    pub fn get_status(&self, request_id: &str) -> Option<JobState> {
        self.jobs.get(request_id)
    }

    pub fn list(&self) -> Vec<JobSummary> {
        self.jobs.list()
    }

    /// Progress events for every request. Filter by [`ProgressEvent::request_id`].
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.jobs.subscribe()
    }

    /// Ask a running request to stop before its next stage.
    pub fn cancel(&self, request_id: &str) -> Result<JobState, PipelineError> {
        let job = self
            .jobs
            .get(request_id)
            .ok_or_else(|| PipelineError::NotFound(format!("request '{}'", request_id)))?;
        if job.is_terminal() {
            return Ok(job);
        }
        if let Some(run) = self.runs.get(request_id) {
            info!(request_id, generation = run.generation, "Cancellation requested");
            run.token.cancel();
        }
        Ok(job)
    }

    /// Result of a succeeded stage. Available even when a later stage failed.
    pub fn artifact(
        &self,
        request_id: &str,
        stage: StageKind,
    ) -> Result<Arc<StageResult>, PipelineError> {
        let job = self
            .jobs
            .get(request_id)
            .ok_or_else(|| PipelineError::NotFound(format!("request '{}'", request_id)))?;
        job.stage(stage)
            .and_then(|s| s.result.clone())
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "{} artifact for request '{}'",
                    stage, request_id
                ))
            })
    }

    /// Drop one cached result by fingerprint.
    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.cache.invalidate(fingerprint)
    }

    /// Wait until the request reaches a terminal state or `timeout` elapses.
    pub async fn wait_for_terminal(&self, request_id: &str, timeout: Duration) -> Option<JobState> {
        let mut rx = self.jobs.subscribe();
        let wait = async {
            loop {
                let job = self.jobs.get(request_id)?;
                if job.is_terminal() {
                    return Some(job);
                }
                match rx.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return self.jobs.get(request_id),
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    async fn run_pipeline(&self, request: ContentRequest, run: RunHandle) {
        let request_id = request.id.as_str();
        let token = &run.token;
        let mut input = ProviderInput::for_topic(request.topic.clone());

        for stage in request.stages.iter().copied() {
            if token.is_cancelled() {
                let err = PipelineError::Cancelled(request_id.to_string());
                self.jobs.skip_remaining(request_id);
                self.jobs.set_status(
                    request_id,
                    JobStatus::Cancelled,
                    Some(JobError {
                        stage,
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }),
                );
                info!(request_id, "Request cancelled before {}", stage);
                self.release(request_id, run.generation);
                return;
            }

            if let Some(previous) = self.succeeded_result(request_id, stage) {
                // Re-seed the cache in case the entry was invalidated meanwhile.
                if self.cache.get(&previous.fingerprint).is_none() {
                    self.cache.insert(previous.clone());
                }
                info!(request_id, "Reusing {} result from {}", stage, previous.provider_id);
                input.absorb(&previous.payload);
                continue;
            }

            self.jobs
                .update_stage(request_id, stage, StageStatus::Running, None);
            match self.run_stage(request_id, stage, &input).await {
                Ok(result) => input.absorb(&result.payload),
                Err(err) => {
                    error!(request_id, "{} stage failed: {}", stage, err);
                    // The executor records its own failures; a ceiling hit
                    // abandons it before it can.
                    if matches!(err, PipelineError::StageTimedOut { .. }) {
                        self.jobs.update_stage(
                            request_id,
                            stage,
                            StageStatus::Failed,
                            Some(StageError::from(&err)),
                        );
                    }
                    self.jobs.skip_remaining(request_id);
                    self.jobs.set_status(
                        request_id,
                        JobStatus::Failed,
                        Some(JobError {
                            stage,
                            code: err.code().to_string(),
                            message: err.to_string(),
                        }),
                    );
                    self.release(request_id, run.generation);
                    return;
                }
            }
        }

        self.jobs.set_status(request_id, JobStatus::Completed, None);
        info!(request_id, "Content request completed");
        self.release(request_id, run.generation);
    }

    /// Drop this run's handle unless a resubmission already replaced it.
    fn release(&self, request_id: &str, generation: u64) {
        self.runs
            .remove_if(request_id, |_, current| current.generation == generation);
    }

    fn succeeded_result(&self, request_id: &str, stage: StageKind) -> Option<Arc<StageResult>> {
        let job = self.jobs.get(request_id)?;
        let state = job.stage(stage)?;
        match state.status {
            StageStatus::Succeeded => state.result.clone(),
            _ => None,
        }
    }

    async fn run_stage(
        &self,
        request_id: &str,
        stage: StageKind,
        input: &ProviderInput,
    ) -> Result<Arc<StageResult>, PipelineError> {
        let work = self.executor.execute(request_id, stage, input);
        if !self.settings.enforce_stage_ceiling {
            return work.await;
        }

        let ceiling = self
            .settings
            .stage_ceiling_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.executor.stage_ceiling(stage));
        match tokio::time::timeout(ceiling, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    request_id,
                    ceiling_ms = ceiling.as_millis() as u64,
                    "{} stage hit its ceiling; production continues detached",
                    stage
                );
                Err(PipelineError::StageTimedOut {
                    capability: stage.capability(),
                    ceiling_ms: ceiling.as_millis() as u64,
                })
            }
        }
    }
}
