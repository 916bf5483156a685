use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::core::error::PipelineError;
use crate::core::lifecycle::LifecycleManager;
use crate::core::pipeline::fingerprint::normalize_topic;
use crate::core::pipeline::{StageExecutor, now_millis};
use crate::core::provider::{Artifact, CapabilityKind, ProviderInput};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSnapshot {
    pub keyword: String,
    pub topics: Vec<String>,
    pub provider_id: String,
    pub fetched_at: u64,
}

impl TrendSnapshot {
    /// Milliseconds since the suggestions were produced.
    pub fn staleness_ms(&self) -> u64 {
        now_millis().saturating_sub(self.fetched_at)
    }
}

/// Trending topic suggestions, produced through the trends capability with the
/// same caching and fallback as a pipeline stage.
#[derive(Clone)]
pub struct TrendService {
    executor: StageExecutor,
    default_keyword: String,
    latest: Arc<RwLock<Option<TrendSnapshot>>>,
}

impl TrendService {
    pub fn new(executor: StageExecutor, default_keyword: impl Into<String>) -> Self {
        Self {
            executor,
            default_keyword: default_keyword.into(),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn default_keyword(&self) -> &str {
        &self.default_keyword
    }

    fn input_for(&self, keyword: Option<&str>) -> ProviderInput {
        let keyword = keyword
            .map(normalize_topic)
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.default_keyword.clone());
        ProviderInput::for_keyword(keyword)
    }

    /// Suggestions for `keyword`, or for the default keyword when none is given.
    /// Served from cache when this keyword was looked up before.
    pub async fn suggest(&self, keyword: Option<&str>) -> Result<TrendSnapshot, PipelineError> {
        let input = self.input_for(keyword);
        let result = self.executor.produce(CapabilityKind::Trends, &input).await?;
        let topics = match &result.payload {
            Artifact::Topics { topics } => topics.clone(),
            other => {
                return Err(PipelineError::ProviderPermanent {
                    provider_id: result.provider_id.clone(),
                    message: format!("expected topics, got a {} artifact", other.kind()),
                });
            }
        };
        Ok(TrendSnapshot {
            keyword: input.topic,
            topics,
            provider_id: result.provider_id.clone(),
            fetched_at: result.produced_at,
        })
    }

    /// Drop the cached suggestions for the default keyword and fetch fresh ones.
    pub async fn refresh(&self) -> Result<TrendSnapshot, PipelineError> {
        let input = self.input_for(None);
        let dropped = self.executor.invalidate(CapabilityKind::Trends, &input);
        let snapshot = self.suggest(None).await?;
        info!(
            keyword = %snapshot.keyword,
            dropped,
            "Refreshed {} trending topic(s)",
            snapshot.topics.len()
        );
        *self.latest.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn latest(&self) -> Option<TrendSnapshot> {
        self.latest.read().await.clone()
    }

    /// Latest snapshot, fetching one first if none exists yet.
    pub async fn latest_or_fetch(&self) -> Result<TrendSnapshot, PipelineError> {
        if let Some(snapshot) = self.latest().await {
            return Ok(snapshot);
        }
        let snapshot = self.suggest(None).await?;
        *self.latest.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

}

/// Register the periodic refresh with the lifecycle scheduler.
pub async fn schedule_refresh(
    lifecycle: &LifecycleManager,
    service: TrendService,
    cron: &str,
) -> anyhow::Result<()> {
    let job = tokio_cron_scheduler::Job::new_async(cron, move |_uuid, mut _l| {
        let service = service.clone();
        Box::pin(async move {
            if let Err(e) = service.refresh().await {
                error!("Trend refresh failed: {}", e);
            }
        })
    })
    .map_err(|e| anyhow::anyhow!("invalid trends.refresh_cron '{}': {}", cron, e))?;
    lifecycle.scheduler.add(job).await?;
    info!("Trend refresh scheduled ({})", cron);
    Ok(())
}
