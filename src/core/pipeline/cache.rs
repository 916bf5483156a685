//! Artifact cache with single-flight production.
//!
//! Entries never expire; they leave only through explicit invalidation. At most
//! one producer runs per fingerprint, and every caller waiting on it observes
//! the same outcome.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, warn};

use super::types::StageResult;
use crate::core::provider::ProviderError;

/// A failed production, delivered identically to every waiter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("production of {fingerprint} failed: {error}")]
pub struct CacheProductionFailed {
    pub fingerprint: String,
    pub provider_id: String,
    pub error: ProviderError,
}

type InFlightResult = Result<Arc<StageResult>, CacheProductionFailed>;

struct InFlightState {
    result: OnceCell<InFlightResult>,
    notify: Notify,
}

impl InFlightState {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn set_result(&self, result: InFlightResult) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> InFlightResult {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entry_count: usize,
    pub in_flight_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub productions: u64,
}

#[derive(Clone, Default)]
pub struct ArtifactCache {
    entries: Arc<DashMap<String, Arc<StageResult>>>,
    in_flight: Arc<DashMap<String, Arc<InFlightState>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    productions: Arc<AtomicU64>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<StageResult>> {
        self.entries.get(fingerprint).map(|e| e.value().clone())
    }

    /// Store a result under its own fingerprint.
    pub fn insert(&self, result: Arc<StageResult>) {
        self.entries.insert(result.fingerprint.clone(), result);
    }

    /// Return the cached result for `fingerprint`, or run `producer` once and
    /// share its outcome with every concurrent caller.
    ///
    /// The producer runs on its own task. A caller that is dropped or times
    /// out does not abort it; the result still lands in the cache.
    pub async fn get_or_produce<F, Fut>(
        &self,
        fingerprint: &str,
        provider_id: &str,
        producer: F,
    ) -> Result<Arc<StageResult>, CacheProductionFailed>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<StageResult, ProviderError>> + Send + 'static,
    {
        if let Some(hit) = self.get(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let (state, is_new) = self.get_or_create_in_flight(fingerprint);
        if !is_new {
            debug!(fingerprint, "Joining in-flight production");
            self.hits.fetch_add(1, Ordering::Relaxed);
            return state.wait().await;
        }

        // A producer may have finished between the lookup and the slot creation.
        if let Some(hit) = self.get(fingerprint) {
            self.complete_in_flight(fingerprint, &state, Ok(hit.clone()));
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.productions.fetch_add(1, Ordering::Relaxed);

        let cache = self.clone();
        let key = fingerprint.to_string();
        let provider_id = provider_id.to_string();
        let slot = state.clone();
        tokio::spawn(async move {
            // The inner task turns a producer panic into a join error.
            let outcome = tokio::spawn(async move { producer().await }).await;
            let result = match outcome {
                Ok(Ok(mut produced)) => {
                    produced.fingerprint = key.clone();
                    Ok(Arc::new(produced))
                }
                Ok(Err(error)) => Err(CacheProductionFailed {
                    fingerprint: key.clone(),
                    provider_id,
                    error,
                }),
                Err(join) => {
                    warn!(fingerprint = %key, "Producer task failed: {}", join);
                    Err(CacheProductionFailed {
                        fingerprint: key.clone(),
                        provider_id,
                        error: ProviderError::Transient(format!("producer task failed: {}", join)),
                    })
                }
            };
            cache.complete_in_flight(&key, &slot, result);
        });

        state.wait().await
    }

    fn get_or_create_in_flight(&self, fingerprint: &str) -> (Arc<InFlightState>, bool) {
        if let Some(existing) = self.in_flight.get(fingerprint) {
            return (existing.clone(), false);
        }

        let state = Arc::new(InFlightState::new());
        match self.in_flight.entry(fingerprint.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(state.clone());
                (state, true)
            }
        }
    }

    /// Publish the outcome. Successes are stored before the slot is released so
    /// a new caller sees either the slot or the entry, never neither.
    fn complete_in_flight(&self, fingerprint: &str, state: &Arc<InFlightState>, result: InFlightResult) {
        if let Ok(produced) = &result {
            self.entries.insert(fingerprint.to_string(), produced.clone());
        }
        self.in_flight
            .remove_if(fingerprint, |_, current| Arc::ptr_eq(current, state));
        state.set_result(result);
    }

    /// Drop a stored entry. An in-flight production is left alone and will
    /// still store its result.
    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.entries.remove(fingerprint).is_some()
    }

    pub fn invalidate_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len(),
            in_flight_count: self.in_flight_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            productions: self.productions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::types::{ResultStatus, now_millis};
    use crate::core::provider::{Artifact, CapabilityKind};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn result(text: &str) -> StageResult {
        StageResult {
            capability: CapabilityKind::Script,
            provider_id: "a".into(),
            fingerprint: String::new(),
            payload: Artifact::text(text),
            produced_at: now_millis(),
            status: ResultStatus::Succeeded,
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_production() {
        let cache = ArtifactCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_produce("fp", "a", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(result("cats"))
                    })
                    .await
            }));
        }

        let mut outputs = Vec::new();
        for h in handles {
            outputs.push(h.await.unwrap().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outputs.iter().all(|r| Arc::ptr_eq(r, &outputs[0])));
        assert_eq!(outputs[0].fingerprint, "fp");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.in_flight_count(), 0);
        assert_eq!(cache.stats().productions, 1);
    }

    #[tokio::test]
    async fn failures_reach_every_waiter_and_are_not_cached() {
        let cache = ArtifactCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let produce = |cache: ArtifactCache, calls: Arc<AtomicUsize>| async move {
            cache
                .get_or_produce("fp", "a", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(ProviderError::Permanent("bad key".into()))
                })
                .await
        };

        let (a, b) = tokio::join!(
            produce(cache.clone(), calls.clone()),
            produce(cache.clone(), calls.clone())
        );
        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert_eq!(a, b);
        assert_eq!(a.error, ProviderError::Permanent("bad key".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("fp").is_none());

        // Not cached, so the next caller produces again.
        let _ = produce(cache.clone(), calls.clone()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_abort_production() {
        let cache = ArtifactCache::new();
        let waited = tokio::time::timeout(
            Duration::from_millis(5),
            cache.get_or_produce("fp", "a", || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(result("late"))
            }),
        )
        .await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let stored = cache.get("fp").expect("production should complete detached");
        assert_eq!(stored.payload.as_text(), Some("late"));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn panicking_producer_fails_waiters() {
        let cache = ArtifactCache::new();
        let err = cache
            .get_or_produce("fp", "a", || async {
                if true {
                    panic!("boom");
                }
                Ok(result("never"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err.error, ProviderError::Transient(_)));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn invalidation_is_explicit() {
        let cache = ArtifactCache::new();
        let mut r = result("cats");
        r.fingerprint = "fp".into();
        cache.insert(Arc::new(r));
        assert!(cache.get("fp").is_some());
        assert!(cache.invalidate("fp"));
        assert!(!cache.invalidate("fp"));
        assert!(cache.is_empty());

        let mut r = result("dogs");
        r.fingerprint = "fp2".into();
        cache.insert(Arc::new(r));
        assert_eq!(cache.invalidate_all(), 1);
    }
}
