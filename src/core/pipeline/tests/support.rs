use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::config::{AdapterKind, PipelineSettings, ProviderConfig};
use crate::core::pipeline::{BackoffPolicy, ContentRequest, JobState, Orchestrator, StageKind};
use crate::core::provider::{
    Artifact, CapabilityKind, ProviderAdapter, ProviderError, ProviderInput, ProviderRegistry,
};

/// Adapter that replays queued outcomes, then repeats a fixed one.
pub(super) struct Scripted {
    id: String,
    capability: CapabilityKind,
    queue: Mutex<VecDeque<Result<Artifact, ProviderError>>>,
    otherwise: Result<Artifact, ProviderError>,
    delay: Duration,
    calls: AtomicUsize,
    inputs: Mutex<Vec<ProviderInput>>,
}

impl Scripted {
    pub(super) fn ok(id: &str, capability: CapabilityKind, artifact: Artifact) -> Self {
        Self {
            id: id.to_string(),
            capability,
            queue: Mutex::new(VecDeque::new()),
            otherwise: Ok(artifact),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn failing(id: &str, capability: CapabilityKind, error: ProviderError) -> Self {
        let mut s = Self::ok(id, capability, Artifact::text(""));
        s.otherwise = Err(error);
        s
    }

    pub(super) fn then(self, outcome: Result<Artifact, ProviderError>) -> Self {
        self.queue.lock().unwrap().push_back(outcome);
        self
    }

    pub(super) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(super) fn last_input(&self) -> Option<ProviderInput> {
        self.inputs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ProviderAdapter for Scripted {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> CapabilityKind {
        self.capability
    }

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let queued = self.queue.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.otherwise.clone())
    }
}

pub(super) fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(1),
        multiplier: 2,
        max: Duration::from_millis(4),
        jitter: 0.2,
    }
}

fn adapter_kind(capability: CapabilityKind) -> AdapterKind {
    match capability {
        CapabilityKind::Script => AdapterKind::Gemini,
        CapabilityKind::Voice => AdapterKind::Elevenlabs,
        CapabilityKind::Visuals => AdapterKind::Pexels,
        CapabilityKind::Trends => AdapterKind::GoogleSuggest,
        CapabilityKind::Assembly => AdapterKind::Manifest,
    }
}

pub(super) fn provider(
    adapter: &Arc<Scripted>,
    priority: u32,
    max_retries: u32,
) -> (ProviderConfig, Arc<Scripted>) {
    let mut cfg = ProviderConfig::new(adapter.id.clone(), adapter_kind(adapter.capability));
    cfg.priority = priority;
    cfg.max_retries = max_retries;
    cfg.timeout_ms = 2_000;
    (cfg, adapter.clone())
}

pub(super) fn orchestrator(providers: Vec<(ProviderConfig, Arc<Scripted>)>) -> Orchestrator {
    orchestrator_with(providers, PipelineSettings::default())
}

pub(super) fn orchestrator_with(
    providers: Vec<(ProviderConfig, Arc<Scripted>)>,
    settings: PipelineSettings,
) -> Orchestrator {
    let mut registry = ProviderRegistry::new();
    for (cfg, adapter) in providers {
        registry.register(cfg, adapter);
    }
    Orchestrator::with_backoff(
        Arc::new(registry),
        settings,
        fast_backoff(),
    )
}

pub(super) fn request(id: &str, topic: &str, stages: &[StageKind]) -> ContentRequest {
    ContentRequest::new(Some(id.to_string()), topic, stages.to_vec()).unwrap()
}

pub(super) async fn run_to_end(orchestrator: &Orchestrator, request: ContentRequest) -> JobState {
    let id = request.id.clone();
    orchestrator.submit(request).unwrap();
    orchestrator
        .wait_for_terminal(&id, Duration::from_secs(5))
        .await
        .expect("job should reach a terminal state")
}

pub(super) fn transient(msg: &str) -> ProviderError {
    ProviderError::Transient(msg.to_string())
}

pub(super) fn permanent(msg: &str) -> ProviderError {
    ProviderError::Permanent(msg.to_string())
}
