use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use viralgen::core::config::{AdapterKind, PipelineSettings, ProviderConfig};
use viralgen::core::pipeline::{
    BackoffPolicy, ContentRequest, JobState, JobStatus, Orchestrator, ProgressEvent, StageKind,
    StageStatus,
};
use viralgen::core::provider::adapters::ManifestAdapter;
use viralgen::core::provider::{
    Artifact, AudioClip, CapabilityKind, ImageRef, ProviderAdapter, ProviderError, ProviderInput,
    ProviderRegistry,
};

/// In-process stand-in for a vendor. Fails permanently while `broken` is set.
struct Stub {
    id: &'static str,
    capability: CapabilityKind,
    broken: AtomicBool,
    calls: AtomicUsize,
}

impl Stub {
    fn new(id: &'static str, capability: CapabilityKind) -> Arc<Self> {
        Arc::new(Self {
            id,
            capability,
            broken: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for Stub {
    fn id(&self) -> &str {
        self.id
    }

    fn capability(&self) -> CapabilityKind {
        self.capability
    }

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.broken.load(Ordering::SeqCst) {
            return Err(ProviderError::Permanent("401 invalid api key".into()));
        }
        Ok(match self.capability {
            CapabilityKind::Script => {
                Artifact::text(format!("Five facts about {}.", input.topic))
            }
            CapabilityKind::Voice => Artifact::Audio(AudioClip::inline(
                "audio/mpeg",
                input.narration().as_bytes().to_vec(),
            )),
            CapabilityKind::Visuals => Artifact::Images {
                images: vec![ImageRef {
                    id: "1".into(),
                    url: format!("https://images.example/{}.jpg", input.topic),
                    photographer: None,
                    alt: None,
                }],
            },
            CapabilityKind::Trends => Artifact::Topics {
                topics: vec![format!("{} today", input.topic)],
            },
            CapabilityKind::Assembly => {
                return Err(ProviderError::Permanent("not an assembler".into()));
            }
        })
    }
}

fn config(id: &str, adapter: AdapterKind) -> ProviderConfig {
    let mut cfg = ProviderConfig::new(id, adapter);
    cfg.max_retries = 2;
    cfg.timeout_ms = 2_000;
    cfg
}

struct Pipeline {
    orchestrator: Orchestrator,
    script: Arc<Stub>,
    voice: Arc<Stub>,
    visuals: Arc<Stub>,
}

fn pipeline(output_dir: Option<std::path::PathBuf>) -> Pipeline {
    let script = Stub::new("writer", CapabilityKind::Script);
    let voice = Stub::new("narrator", CapabilityKind::Voice);
    let visuals = Stub::new("stock", CapabilityKind::Visuals);

    let mut registry = ProviderRegistry::new();
    registry.register(config("writer", AdapterKind::OpenaiCompatible), script.clone());
    registry.register(config("narrator", AdapterKind::Elevenlabs), voice.clone());
    registry.register(config("stock", AdapterKind::Pexels), visuals.clone());

    let mut assembly = config("assembler", AdapterKind::Manifest);
    assembly.output_dir = output_dir;
    let manifest = Arc::new(ManifestAdapter::new(&assembly));
    registry.register(assembly, manifest);

    let orchestrator = Orchestrator::with_backoff(
        Arc::new(registry),
        PipelineSettings::default(),
        BackoffPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(4),
            ..BackoffPolicy::default()
        },
    );
    Pipeline {
        orchestrator,
        script,
        voice,
        visuals,
    }
}

async fn run(orchestrator: &Orchestrator, id: &str, topic: &str) -> JobState {
    let request = ContentRequest::new(Some(id.to_string()), topic, StageKind::ALL.to_vec()).unwrap();
    orchestrator.submit(request).unwrap();
    orchestrator
        .wait_for_terminal(id, Duration::from_secs(10))
        .await
        .expect("request should finish")
}

#[tokio::test]
async fn full_pipeline_exports_a_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(Some(dir.path().to_path_buf()));

    let job = run(&p.orchestrator, "octo-1", "octopus").await;
    assert_eq!(job.status, JobStatus::Completed);
    for stage in &job.stages {
        assert_eq!(stage.status, StageStatus::Succeeded, "{:?}", stage.kind);
        assert_eq!(stage.attempts, 1);
    }

    let assembled = p
        .orchestrator
        .artifact("octo-1", StageKind::Assembly)
        .unwrap();
    let Artifact::Manifest(manifest) = &assembled.payload else {
        panic!("assembly should produce a manifest");
    };
    assert_eq!(manifest.script.as_deref(), Some("Five facts about octopus."));
    assert_eq!(
        manifest.audio.as_ref().unwrap().size_bytes,
        "Five facts about octopus.".len()
    );
    assert_eq!(manifest.images, vec!["https://images.example/octopus.jpg"]);

    let written = manifest.output_path.as_ref().unwrap();
    let on_disk: serde_json::Value =
        serde_json::from_slice(&std::fs::read(written).unwrap()).unwrap();
    assert_eq!(on_disk["topic"], "octopus");
    assert!(std::path::Path::new(&written.replace(".json", ".mp3")).exists());
}

#[tokio::test]
async fn failed_request_resumes_where_it_stopped() {
    let p = pipeline(None);
    p.visuals.broken.store(true, Ordering::SeqCst);

    let failed = run(&p.orchestrator, "r1", "volcanoes").await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_ref().unwrap().stage, StageKind::Visuals);
    assert_eq!(
        failed.stage(StageKind::Assembly).unwrap().status,
        StageStatus::Skipped
    );
    // Permanent errors are not retried.
    assert_eq!(p.visuals.calls(), 1);
    assert!(p.orchestrator.artifact("r1", StageKind::Voice).is_ok());

    p.visuals.broken.store(false, Ordering::SeqCst);
    let resumed = run(&p.orchestrator, "r1", "volcanoes").await;
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(p.script.calls(), 1);
    assert_eq!(p.voice.calls(), 1);
    assert_eq!(p.visuals.calls(), 2);
    assert!(resumed.error.is_none());
}

#[tokio::test]
async fn many_requests_for_one_topic_produce_once() {
    let p = pipeline(None);

    for i in 0..8 {
        let request = ContentRequest::new(
            Some(format!("req-{}", i)),
            "black holes",
            vec![StageKind::Script, StageKind::Voice],
        )
        .unwrap();
        p.orchestrator.submit(request).unwrap();
    }
    for i in 0..8 {
        let job = p
            .orchestrator
            .wait_for_terminal(&format!("req-{}", i), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    assert_eq!(p.script.calls(), 1);
    assert_eq!(p.voice.calls(), 1);
    assert_eq!(p.orchestrator.list().len(), 8);

    // A different topic is a different fingerprint.
    run(&p.orchestrator, "other", "white dwarfs").await;
    assert_eq!(p.script.calls(), 2);
}

#[tokio::test]
async fn progress_events_follow_stage_order() {
    let p = pipeline(None);
    let mut events = p.orchestrator.subscribe();

    let job = run(&p.orchestrator, "ev-1", "tides").await;
    assert_eq!(job.status, JobStatus::Completed);

    let mut started = Vec::new();
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        if event.request_id() != "ev-1" {
            continue;
        }
        if let ProgressEvent::Stage {
            stage,
            status: StageStatus::Running,
            ..
        } = &event
        {
            started.push(*stage);
        }
        last = Some(event);
    }

    assert_eq!(started, StageKind::ALL.to_vec());
    match last {
        Some(ProgressEvent::Job { status, .. }) => assert_eq!(status, JobStatus::Completed),
        other => panic!("expected a final job event, got {:?}", other),
    }
}
