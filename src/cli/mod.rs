mod providers;
mod run;
mod serve;
mod trends;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::core::config::AppConfig;
use crate::core::pipeline::Orchestrator;
use crate::core::provider::ProviderRegistry;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::core::trends::TrendService;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the HTTP API and the trend refresher")
        .command("run", "Produce content for one topic and wait for it")
        .print();

    GuideSection::new("Discovery")
        .command("trends", "Show trending topic suggestions")
        .command("providers", "List configured providers and credentials")
        .print();

    GuideSection::new("Options")
        .text("--config <path>      Config file (default: $VIRALGEN_CONFIG or config dir)")
        .text("--host <addr>        serve: bind address")
        .text("--port <n>           serve: bind port")
        .text("--topic <text>       run: topic to produce")
        .text("--stages <a,b>       run: stages, e.g. script,voice,visuals,assembly")
        .text("--id <id>            run: request id (default: random)")
        .text("--timeout <secs>     run: how long to wait (default: 600)")
        .text("--keyword <text>     trends: seed keyword")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("viralgen").green()
    );
}

/// Value following `flag`, if present.
fn flag_value(args: &[String], i: usize) -> Option<String> {
    args.get(i + 1).cloned()
}

pub(crate) fn parse_config_flag(args: &[String], start: usize) -> Option<PathBuf> {
    let mut i = start;
    while i < args.len() {
        if args[i] == "--config" || args[i] == "-c" {
            return flag_value(args, i).map(PathBuf::from);
        }
        i += 1;
    }
    None
}

pub(crate) fn parse_serve_flags(
    args: &[String],
    start: usize,
    mut host: String,
    mut port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if let Some(value) = flag_value(args, i) {
                    port = value.parse().unwrap_or(port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if let Some(value) = flag_value(args, i) {
                    host = value;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (host, port)
}

pub(crate) struct RunCommandArgs {
    pub id: Option<String>,
    pub topic: String,
    pub stages: Option<Vec<String>>,
    pub timeout_secs: u64,
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> RunCommandArgs {
    let mut parsed = RunCommandArgs {
        id: None,
        topic: String::new(),
        stages: None,
        timeout_secs: 600,
    };
    let mut i = start;
    while i < args.len() {
        let value = flag_value(args, i);
        match (args[i].as_str(), value) {
            ("--topic" | "-t", Some(v)) => {
                parsed.topic = v;
                i += 2;
            }
            ("--stages" | "-s", Some(v)) => {
                parsed.stages = Some(
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                );
                i += 2;
            }
            ("--id", Some(v)) => {
                parsed.id = Some(v);
                i += 2;
            }
            ("--timeout", Some(v)) => {
                parsed.timeout_secs = v.parse().unwrap_or(parsed.timeout_secs);
                i += 2;
            }
            _ => i += 1,
        }
    }
    parsed
}

pub(crate) fn parse_keyword_flag(args: &[String], start: usize) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        if args[i] == "--keyword" || args[i] == "-k" {
            return flag_value(args, i);
        }
        i += 1;
    }
    None
}

/// Everything a command needs to produce content, built from one config.
pub(crate) struct Runtime {
    pub registry: Arc<ProviderRegistry>,
    pub orchestrator: Orchestrator,
    pub trends: TrendService,
}

impl Runtime {
    pub fn build(config: &AppConfig) -> Self {
        let registry = Arc::new(ProviderRegistry::from_configs(&config.providers));
        let orchestrator = Orchestrator::new(registry.clone(), config.pipeline.clone());
        let trends = TrendService::new(
            orchestrator.executor().clone(),
            config.trends.default_keyword.clone(),
        );
        Self {
            registry,
            orchestrator,
            trends,
        }
    }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "serve" => serve::run_serve(&args).await,
        "run" => {
            let parsed = parse_run_command_args(&args, 2);
            if parsed.topic.trim().is_empty() {
                print_error("Error: --topic is required for run.");
                print_help();
                return Ok(());
            }
            run::run_once(parse_config_flag(&args, 2), parsed).await
        }
        "trends" => {
            trends::run_trends(parse_config_flag(&args, 2), parse_keyword_flag(&args, 2)).await
        }
        "providers" => providers::run_providers(parse_config_flag(&args, 2)).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
