use std::path::PathBuf;

use anyhow::Result;

use super::Runtime;
use crate::core::config::AppConfig;
use crate::core::terminal::GuideSection;
use crate::logging;

pub async fn run_trends(config_path: Option<PathBuf>, keyword: Option<String>) -> Result<()> {
    logging::init("warn", false);

    let config = AppConfig::load(config_path.as_deref()).await?;
    let runtime = Runtime::build(&config);
    let snapshot = runtime.trends.suggest(keyword.as_deref()).await?;

    let mut section = GuideSection::new(&format!("Trending for '{}'", snapshot.keyword))
        .status("Source", &snapshot.provider_id)
        .blank();
    if snapshot.topics.is_empty() {
        section = section.text("No suggestions.");
    }
    for topic in &snapshot.topics {
        section = section.bullet(topic);
    }
    section.print();
    println!();
    Ok(())
}
