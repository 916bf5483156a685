use std::path::PathBuf;

use anyhow::Result;
use console::style;

use super::Runtime;
use crate::core::config::AppConfig;
use crate::core::provider::CapabilityKind;
use crate::core::terminal::{GuideSection, print_warn};
use crate::logging;

pub async fn run_providers(config_path: Option<PathBuf>) -> Result<()> {
    logging::init("error", false);

    let config = AppConfig::load(config_path.as_deref()).await?;
    if config.providers.is_empty() {
        print_warn("No providers configured.");
        return Ok(());
    }
    let runtime = Runtime::build(&config);

    for capability in [
        CapabilityKind::Script,
        CapabilityKind::Voice,
        CapabilityKind::Visuals,
        CapabilityKind::Assembly,
        CapabilityKind::Trends,
    ] {
        let mut entries: Vec<_> = config
            .providers
            .iter()
            .filter(|p| p.capability == capability)
            .collect();
        if entries.is_empty() {
            continue;
        }
        entries.sort_by_key(|p| p.priority);

        let mut section = GuideSection::new(capability.as_str());
        for p in entries {
            let state = if runtime.registry.get(&p.id).is_some() {
                style("ready").green().to_string()
            } else if p.adapter.requires_credentials() && p.credentials.api_key().is_none() {
                style(format!(
                    "missing ${}",
                    p.api_key_env.as_deref().unwrap_or("API key")
                ))
                .yellow()
                .to_string()
            } else {
                style("unavailable").red().to_string()
            };
            section = section.command(
                &p.id,
                &format!(
                    "priority {}, {} attempt(s), {} ms timeout  [{}]",
                    p.priority, p.max_retries, p.timeout_ms, state
                ),
            );
        }
        section.print();
    }
    println!();
    Ok(())
}
