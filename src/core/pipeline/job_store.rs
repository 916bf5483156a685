use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::types::{
    ContentRequest, JobError, JobState, JobStatus, JobSummary, ProgressEvent, StageError,
    StageKind, StageResult, StageStatus, now_millis,
};

/// Per-request progress. Each mutation runs under the job's shard lock and
/// publishes a [`ProgressEvent`] once the lock is released.
#[derive(Clone)]
pub struct JobStateStore {
    jobs: Arc<DashMap<String, JobState>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl JobStateStore {
    pub fn new(buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            jobs: Arc::new(DashMap::new()),
            events,
        }
    }

    fn publish(&self, event: ProgressEvent) {
        let _ = self.events.send(event); // No subscribers is fine
    }

    fn mutate<F>(&self, request_id: &str, f: F) -> Option<JobState>
    where
        F: FnOnce(&mut JobState, u64) -> Vec<ProgressEvent>,
    {
        let (snapshot, events) = {
            let mut job = self.jobs.get_mut(request_id)?;
            let now = now_millis();
            let events = f(job.value_mut(), now);
            job.updated_at = now;
            (job.value().clone(), events)
        };
        for event in events {
            self.publish(event);
        }
        Some(snapshot)
    }

    /// Create the job for `request` unless one already exists. Returns the
    /// stored state and whether it was created by this call.
    pub fn create_if_absent(&self, request: &ContentRequest) -> (JobState, bool) {
        let (job, created) = match self.jobs.entry(request.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let job = JobState::new(request);
                entry.insert(job.clone());
                (job, true)
            }
        };
        if created {
            self.publish(ProgressEvent::Job {
                request_id: job.request_id.clone(),
                status: job.status,
                at: job.created_at,
            });
        }
        (job, created)
    }

    /// Put a failed or cancelled job back to running. Succeeded stages keep
    /// their results; every other stage starts over. Returns `None` when the
    /// job is unknown or not in a resumable state.
    pub fn reopen(&self, request_id: &str) -> Option<JobState> {
        let mut reopened = false;
        let snapshot = self.mutate(request_id, |job, now| {
            if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
                return Vec::new();
            }
            reopened = true;
            job.status = JobStatus::Running;
            job.error = None;
            for stage in job.stages.iter_mut() {
                if stage.status != StageStatus::Succeeded {
                    stage.reset(now);
                }
            }
            vec![ProgressEvent::Job {
                request_id: job.request_id.clone(),
                status: job.status,
                at: now,
            }]
        })?;
        reopened.then_some(snapshot)
    }

    pub fn update_stage(
        &self,
        request_id: &str,
        stage: StageKind,
        status: StageStatus,
        error: Option<StageError>,
    ) -> Option<JobState> {
        self.mutate(request_id, |job, now| {
            let request_id = job.request_id.clone();
            let Some(state) = job.stage_mut(stage) else {
                return Vec::new();
            };
            state.status = status;
            state.updated_at = now;
            if error.is_some() {
                state.last_error = error;
            }
            vec![ProgressEvent::Stage {
                request_id,
                stage,
                status,
                attempts: state.attempts,
                provider_id: state.provider_id.clone(),
                at: now,
            }]
        })
    }

    /// Count one provider invocation against the stage. Attempts accumulate
    /// across providers.
    pub fn record_attempt(
        &self,
        request_id: &str,
        stage: StageKind,
        provider_id: &str,
        error: Option<StageError>,
    ) -> Option<JobState> {
        self.mutate(request_id, |job, now| {
            let request_id = job.request_id.clone();
            let Some(state) = job.stage_mut(stage) else {
                return Vec::new();
            };
            state.attempts += 1;
            state.provider_id = Some(provider_id.to_string());
            state.updated_at = now;
            if error.is_some() {
                state.last_error = error.clone();
            }
            vec![ProgressEvent::Attempt {
                request_id,
                stage,
                provider_id: provider_id.to_string(),
                attempt: state.attempts,
                error,
                at: now,
            }]
        })
    }

    pub fn complete_stage(
        &self,
        request_id: &str,
        stage: StageKind,
        result: Arc<StageResult>,
    ) -> Option<JobState> {
        self.mutate(request_id, |job, now| {
            let request_id = job.request_id.clone();
            let Some(state) = job.stage_mut(stage) else {
                return Vec::new();
            };
            state.status = StageStatus::Succeeded;
            state.provider_id = Some(result.provider_id.clone());
            state.result = Some(result);
            state.updated_at = now;
            vec![ProgressEvent::Stage {
                request_id,
                stage,
                status: StageStatus::Succeeded,
                attempts: state.attempts,
                provider_id: state.provider_id.clone(),
                at: now,
            }]
        })
    }

    /// Mark every stage that has not run yet as skipped.
    pub fn skip_remaining(&self, request_id: &str) -> Option<JobState> {
        self.mutate(request_id, |job, now| {
            let request_id = job.request_id.clone();
            job.stages
                .iter_mut()
                .filter(|s| matches!(s.status, StageStatus::Pending | StageStatus::Running))
                .map(|s| {
                    s.status = StageStatus::Skipped;
                    s.updated_at = now;
                    ProgressEvent::Stage {
                        request_id: request_id.clone(),
                        stage: s.kind,
                        status: StageStatus::Skipped,
                        attempts: s.attempts,
                        provider_id: s.provider_id.clone(),
                        at: now,
                    }
                })
                .collect()
        })
    }

    pub fn set_status(
        &self,
        request_id: &str,
        status: JobStatus,
        error: Option<JobError>,
    ) -> Option<JobState> {
        self.mutate(request_id, |job, now| {
            job.status = status;
            job.error = error;
            vec![ProgressEvent::Job {
                request_id: job.request_id.clone(),
                status,
                at: now,
            }]
        })
    }

    pub fn get(&self, request_id: &str) -> Option<JobState> {
        self.jobs.get(request_id).map(|j| j.value().clone())
    }

    /// Summaries, most recently updated first.
    pub fn list(&self) -> Vec<JobSummary> {
        let mut out: Vec<JobSummary> = self.jobs.iter().map(|j| j.value().summary()).collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::types::ResultStatus;
    use crate::core::provider::{Artifact, CapabilityKind};

    fn request(id: &str) -> ContentRequest {
        ContentRequest::new(
            Some(id.into()),
            "cats",
            vec![StageKind::Script, StageKind::Voice, StageKind::Visuals],
        )
        .unwrap()
    }

    fn script_result() -> Arc<StageResult> {
        Arc::new(StageResult {
            capability: CapabilityKind::Script,
            provider_id: "a".into(),
            fingerprint: "fp".into(),
            payload: Artifact::text("Cats!"),
            produced_at: now_millis(),
            status: ResultStatus::Succeeded,
        })
    }

    #[test]
    fn create_is_idempotent() {
        let store = JobStateStore::new(16);
        let (job, created) = store.create_if_absent(&request("r1"));
        assert!(created);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.stages.iter().all(|s| s.status == StageStatus::Pending));

        let (_, created) = store.create_if_absent(&request("r1"));
        assert!(!created);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn attempts_accumulate_and_keep_last_error() {
        let store = JobStateStore::new(16);
        store.create_if_absent(&request("r1"));
        let err = StageError {
            code: "transient".into(),
            message: "503".into(),
            provider_id: Some("a".into()),
        };
        store.record_attempt("r1", StageKind::Script, "a", Some(err.clone()));
        store.record_attempt("r1", StageKind::Script, "b", None);

        let job = store.get("r1").unwrap();
        let script = job.stage(StageKind::Script).unwrap();
        assert_eq!(script.attempts, 2);
        assert_eq!(script.provider_id.as_deref(), Some("b"));
        assert_eq!(script.last_error, Some(err));
    }

    #[test]
    fn reopen_keeps_succeeded_stages_only() {
        let store = JobStateStore::new(16);
        store.create_if_absent(&request("r1"));
        assert!(store.reopen("r1").is_none(), "running jobs are not reopened");

        store.record_attempt("r1", StageKind::Script, "a", None);
        store.complete_stage("r1", StageKind::Script, script_result());
        store.record_attempt("r1", StageKind::Voice, "v", None);
        store.update_stage("r1", StageKind::Voice, StageStatus::Failed, None);
        store.skip_remaining("r1");
        store.set_status("r1", JobStatus::Failed, None);

        let job = store.reopen("r1").unwrap();
        assert_eq!(job.status, JobStatus::Running);
        let script = job.stage(StageKind::Script).unwrap();
        assert_eq!(script.status, StageStatus::Succeeded);
        assert_eq!(script.attempts, 1);
        assert!(script.result.is_some());
        let voice = job.stage(StageKind::Voice).unwrap();
        assert_eq!(voice.status, StageStatus::Pending);
        assert_eq!(voice.attempts, 0);
        assert_eq!(
            job.stage(StageKind::Visuals).unwrap().status,
            StageStatus::Pending
        );
    }

    #[tokio::test]
    async fn mutations_are_published() {
        let store = JobStateStore::new(16);
        let mut rx = store.subscribe();
        store.create_if_absent(&request("r1"));
        store.update_stage("r1", StageKind::Script, StageStatus::Running, None);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ProgressEvent::Job { status: JobStatus::Running, .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.request_id(), "r1");
        assert!(matches!(
            second,
            ProgressEvent::Stage {
                stage: StageKind::Script,
                status: StageStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn unknown_jobs_are_ignored() {
        let store = JobStateStore::new(16);
        assert!(store.update_stage("nope", StageKind::Script, StageStatus::Running, None).is_none());
        assert!(store.get("nope").is_none());
        assert!(store.list().is_empty());
    }
}
