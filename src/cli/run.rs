use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use console::style;
use tokio::sync::broadcast::error::RecvError;

use super::{RunCommandArgs, Runtime};
use crate::core::config::AppConfig;
use crate::core::pipeline::{
    ContentRequest, JobState, JobStatus, ProgressEvent, StageStatus, parse_stages,
};
use crate::core::provider::Artifact;
use crate::core::terminal::{GuideSection, print_error, print_step, print_success, print_warn};
use crate::logging;

fn describe(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::Stage {
            stage,
            status: StageStatus::Running,
            ..
        } => Some(format!("{} started", stage)),
        ProgressEvent::Stage {
            stage,
            status,
            provider_id,
            attempts,
            ..
        } => Some(format!(
            "{} {:?} via {} ({} attempt(s))",
            stage,
            status,
            provider_id.as_deref().unwrap_or("-"),
            attempts
        )),
        ProgressEvent::Attempt {
            stage,
            provider_id,
            attempt,
            error: Some(err),
            ..
        } => Some(format!(
            "{} attempt {} on {} failed: {}",
            stage, attempt, provider_id, err.message
        )),
        _ => None,
    }
}

fn preview(artifact: &Artifact) -> String {
    match artifact {
        Artifact::Text { text } => {
            let line = text.lines().next().unwrap_or_default();
            if line.chars().count() > 72 {
                format!("{}...", line.chars().take(72).collect::<String>())
            } else {
                line.to_string()
            }
        }
        Artifact::Audio(clip) => match &clip.url {
            Some(url) => format!("{} at {}", clip.mime_type, url),
            None => format!("{} ({} bytes)", clip.mime_type, clip.bytes.len()),
        },
        Artifact::Images { images } => format!("{} image(s)", images.len()),
        Artifact::Topics { topics } => topics.join(", "),
        Artifact::Manifest(manifest) => manifest
            .output_path
            .clone()
            .unwrap_or_else(|| format!("manifest for '{}'", manifest.topic)),
    }
}

fn print_report(job: &JobState) {
    let mut section = GuideSection::new(&format!("Request {}", job.request_id))
        .status("Topic", &job.topic)
        .status("Status", job.status.as_str())
        .blank();
    for stage in &job.stages {
        let detail = match (&stage.result, &stage.last_error) {
            (Some(result), _) => preview(&result.payload),
            (None, Some(err)) => format!("{}: {}", err.code, err.message),
            (None, None) => String::new(),
        };
        section = section.bullet(&format!(
            "{} [{}] {}",
            style(stage.kind.as_str()).bold(),
            style(format!("{:?}", stage.status).to_lowercase()).dim(),
            detail
        ));
    }
    section.print();
}

/// Submit one request in-process and follow it to a terminal state.
pub async fn run_once(config_path: Option<PathBuf>, parsed: RunCommandArgs) -> Result<()> {
    logging::init("warn", false);

    let config = AppConfig::load(config_path.as_deref()).await?;
    let stages = match &parsed.stages {
        Some(names) => parse_stages(names.as_slice())?,
        None => config.pipeline.default_stages.clone(),
    };
    let request = ContentRequest::new(parsed.id, parsed.topic, stages)?;
    let request_id = request.id.clone();
    let stage_list = request
        .stages
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(" → ");

    let runtime = Runtime::build(&config);
    let orchestrator = runtime.orchestrator;
    let mut events = orchestrator.subscribe();
    orchestrator.submit(request)?;
    print_step(&format!("Producing '{}' ({})", request_id, stage_list));

    let follow = async {
        loop {
            match events.recv().await {
                Ok(event) if event.request_id() == request_id => {
                    if let Some(line) = describe(&event) {
                        println!("  {} {}", style("›").cyan(), line);
                    }
                    if let ProgressEvent::Job { status, .. } = event
                        && status.is_terminal()
                    {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => print_warn(&format!("missed {} progress event(s)", n)),
                Err(RecvError::Closed) => break,
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(parsed.timeout_secs), follow)
        .await
        .is_err()
    {
        orchestrator.cancel(&request_id)?;
        bail!(
            "request '{}' did not finish within {}s and was cancelled",
            request_id,
            parsed.timeout_secs
        );
    }

    let Some(job) = orchestrator.get_status(&request_id) else {
        bail!("request '{}' disappeared", request_id);
    };
    print_report(&job);

    match job.status {
        JobStatus::Completed => {
            print_success("All stages completed.");
            Ok(())
        }
        _ => {
            if let Some(err) = &job.error {
                print_error(&format!("stopped at {} stage: {}", err.stage, err.message));
            }
            bail!("request '{}' ended {}", request_id, job.status.as_str())
        }
    }
}
