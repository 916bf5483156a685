use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::cache::ArtifactCache;
use super::fingerprint::{fingerprint, input_digest};
use super::job_store::JobStateStore;
use super::retry::BackoffPolicy;
use super::types::{ResultStatus, StageError, StageKind, StageResult, StageStatus, now_millis};
use crate::core::error::PipelineError;
use crate::core::provider::{
    CapabilityKind, Provider, ProviderError, ProviderInput, ProviderRegistry,
};

/// Which job a production is accounted to.
#[derive(Debug, Clone)]
struct Tracker {
    request_id: String,
    stage: StageKind,
}

/// Runs one capability against its providers in priority order, with
/// per-attempt timeout, backoff retries and fallback.
#[derive(Clone)]
pub struct StageExecutor {
    registry: Arc<ProviderRegistry>,
    cache: ArtifactCache,
    jobs: JobStateStore,
    backoff: BackoffPolicy,
}

impl StageExecutor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: ArtifactCache,
        jobs: JobStateStore,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            registry,
            cache,
            jobs,
            backoff,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Worst-case duration of one stage with the configured providers.
    pub fn stage_ceiling(&self, stage: StageKind) -> Duration {
        self.backoff
            .stage_ceiling(&self.registry.for_capability(stage.capability()))
    }

    /// Providers for `capability` with the fingerprint each would produce under.
    pub fn fingerprints(
        &self,
        capability: CapabilityKind,
        input: &ProviderInput,
    ) -> Vec<(Provider, String)> {
        let digest = input_digest(capability, input);
        self.registry
            .for_capability(capability)
            .into_iter()
            .map(|p| {
                let fp = fingerprint(capability, &digest, &p.config.id);
                (p, fp)
            })
            .collect()
    }

    /// Run one stage of a request, recording progress in the job store.
    pub async fn execute(
        &self,
        request_id: &str,
        stage: StageKind,
        input: &ProviderInput,
    ) -> Result<Arc<StageResult>, PipelineError> {
        let tracker = Tracker {
            request_id: request_id.to_string(),
            stage,
        };
        match self.run(stage.capability(), input, Some(tracker)).await {
            Ok(result) => {
                self.jobs.complete_stage(request_id, stage, result.clone());
                Ok(result)
            }
            Err(err) => {
                let detail = match &err {
                    PipelineError::AllProvidersExhausted {
                        last_error: Some(last),
                        ..
                    } => StageError::from(last.as_ref()),
                    other => StageError::from(other),
                };
                self.jobs
                    .update_stage(request_id, stage, StageStatus::Failed, Some(detail));
                Err(err)
            }
        }
    }

    /// Produce a capability outside any job, e.g. trend lookups.
    pub async fn produce(
        &self,
        capability: CapabilityKind,
        input: &ProviderInput,
    ) -> Result<Arc<StageResult>, PipelineError> {
        self.run(capability, input, None).await
    }

    /// Drop every cached result `input` could have produced for `capability`.
    pub fn invalidate(&self, capability: CapabilityKind, input: &ProviderInput) -> usize {
        self.fingerprints(capability, input)
            .iter()
            .filter(|(_, fp)| self.cache.invalidate(fp))
            .count()
    }

    async fn run(
        &self,
        capability: CapabilityKind,
        input: &ProviderInput,
        tracker: Option<Tracker>,
    ) -> Result<Arc<StageResult>, PipelineError> {
        let keyed = self.fingerprints(capability, input);
        if keyed.is_empty() {
            warn!("No provider configured for {}", capability);
            return Err(PipelineError::AllProvidersExhausted {
                capability,
                attempts: 0,
                last_error: None,
            });
        }

        for (provider, fp) in &keyed {
            if let Some(hit) = self.cache.get(fp) {
                debug!(
                    provider = %provider.config.id,
                    fingerprint = %fp,
                    "Cache hit for {}",
                    capability
                );
                return Ok(hit);
            }
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let mut last_error: Option<PipelineError> = None;

        for (provider, fp) in keyed {
            let provider_id = provider.config.id.clone();
            let producer = {
                let input = input.clone();
                let jobs = self.jobs.clone();
                let backoff = self.backoff;
                let tracker = tracker.clone();
                let attempts = attempts.clone();
                move || attempt_provider(provider, input, backoff, jobs, tracker, attempts)
            };

            match self.cache.get_or_produce(&fp, &provider_id, producer).await {
                Ok(result) => {
                    info!(
                        provider = %provider_id,
                        attempts = attempts.load(Ordering::Relaxed),
                        "{} produced",
                        capability
                    );
                    return Ok(result);
                }
                Err(failed) => {
                    warn!(
                        provider = %provider_id,
                        "{} provider exhausted, falling back: {}",
                        capability,
                        failed.error
                    );
                    last_error = Some(PipelineError::from_provider(&provider_id, &failed.error));
                }
            }
        }

        Err(PipelineError::AllProvidersExhausted {
            capability,
            attempts: attempts.load(Ordering::Relaxed),
            last_error: last_error.map(Box::new),
        })
    }
}

/// Retry loop for one provider. Runs as the single-flight producer.
async fn attempt_provider(
    provider: Provider,
    input: ProviderInput,
    backoff: BackoffPolicy,
    jobs: JobStateStore,
    tracker: Option<Tracker>,
    attempts: Arc<AtomicU32>,
) -> Result<StageResult, ProviderError> {
    let cfg = &provider.config;
    let budget = cfg.max_retries.max(1);
    let empty_budget = cfg.empty_result_budget().max(1);
    let timeout = Duration::from_millis(cfg.timeout_ms);

    let mut attempt = 0u32;
    let mut empty_attempts = 0u32;
    loop {
        attempt += 1;
        attempts.fetch_add(1, Ordering::Relaxed);

        let outcome = match tokio::time::timeout(timeout, provider.adapter.invoke(&input)).await {
            Ok(Ok(artifact)) if artifact.is_empty() => Err(ProviderError::EmptyResult(format!(
                "{} returned an empty {}",
                cfg.id, cfg.capability
            ))),
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Transient(format!(
                "{} timed out after {} ms",
                cfg.id, cfg.timeout_ms
            ))),
        };

        if let Some(t) = &tracker {
            let error = outcome
                .as_ref()
                .err()
                .map(|e| StageError::from_provider(&cfg.id, e));
            jobs.record_attempt(&t.request_id, t.stage, &cfg.id, error);
        }

        let err = match outcome {
            Ok(payload) => {
                return Ok(StageResult {
                    capability: cfg.capability,
                    provider_id: cfg.id.clone(),
                    fingerprint: String::new(),
                    payload,
                    produced_at: now_millis(),
                    status: ResultStatus::Succeeded,
                });
            }
            Err(err) => err,
        };

        let exhausted = match &err {
            ProviderError::Permanent(_) => true,
            ProviderError::EmptyResult(_) => {
                empty_attempts += 1;
                empty_attempts >= empty_budget || attempt >= budget
            }
            ProviderError::Transient(_) => attempt >= budget,
        };
        if exhausted {
            debug!(provider = %cfg.id, attempt, "Giving up: {}", err);
            return Err(err);
        }

        let delay = backoff.delay(attempt - 1);
        debug!(
            provider = %cfg.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retrying after {}",
            err
        );
        tokio::time::sleep(delay).await;
    }
}
