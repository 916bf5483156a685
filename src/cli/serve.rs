use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use super::{Runtime, parse_config_flag, parse_serve_flags};
use crate::core::config::AppConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::{self, print_link, print_status, print_warn};
use crate::core::trends::schedule_refresh;
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging;

pub async fn run_serve(args: &[String]) -> Result<()> {
    let log_tx = logging::init("info", false);

    let config = AppConfig::load(parse_config_flag(args, 2).as_deref()).await?;
    let (host, port) = parse_serve_flags(
        args,
        2,
        config.server.host.clone(),
        config.server.port,
    );

    terminal::print_banner();
    let runtime = Runtime::build(&config);
    if runtime.registry.is_empty() {
        print_warn("No providers registered. Requests will fail until some are configured.");
    }
    print_status("Providers", &runtime.registry.list().len().to_string());

    let mut lifecycle = LifecycleManager::new().await?;

    if config.trends.enabled {
        schedule_refresh(
            &lifecycle,
            runtime.trends.clone(),
            &config.trends.refresh_cron,
        )
        .await?;
        print_status("Trend refresh", &config.trends.refresh_cron);
    }

    let api = ApiServer::new(ApiServerConfig {
        orchestrator: runtime.orchestrator.clone(),
        trends: runtime.trends.clone(),
        registry: runtime.registry.clone(),
        log_tx,
        api_host: host.clone(),
        api_port: port,
        api_token: config.server.api_token.clone(),
    });
    lifecycle.attach(Arc::new(Mutex::new(api)));
    lifecycle.start().await?;

    print_link("API", &format!("http://{}:{}/api/health", host, port));
    info!("viralgen is serving. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    lifecycle.shutdown().await
}
