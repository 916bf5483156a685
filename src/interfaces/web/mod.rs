pub(crate) mod auth;
mod handlers;
mod router;

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::lifecycle::LifecycleComponent;
use crate::core::pipeline::Orchestrator;
use crate::core::provider::ProviderRegistry;
use crate::core::trends::TrendService;

pub use router::build_api_router;

/// HTTP transport over the orchestrator, run as a lifecycle component.
pub struct ApiServer {
    state: AppState,
    shutdown: CancellationToken,
}

pub struct ApiServerConfig {
    pub orchestrator: Orchestrator,
    pub trends: TrendService,
    pub registry: Arc<ProviderRegistry>,
    pub log_tx: broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    pub api_token: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) orchestrator: Orchestrator,
    pub(crate) trends: TrendService,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
    pub(crate) api_token: Option<String>,
}

impl From<ApiServerConfig> for AppState {
    fn from(config: ApiServerConfig) -> Self {
        Self {
            orchestrator: config.orchestrator,
            trends: config.trends,
            registry: config.registry,
            log_tx: config.log_tx,
            api_host: config.api_host,
            api_port: config.api_port,
            api_token: config.api_token,
        }
    }
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: config.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.state.api_host, self.state.api_port)
    }
}

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = self.address();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding API server to {}", addr))?;
        let app = router::build_api_router(self.state.clone());
        let shutdown = self.shutdown.clone();

        info!("API server running at http://{addr}");
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!("API server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API server shutting down...");
        self.shutdown.cancel();
        Ok(())
    }
}
