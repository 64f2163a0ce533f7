//! `comfyrest` -- submit ComfyUI workflows and wait for their outcome.
//!
//! # Environment variables
//!
//! | Variable                       | Default                 | Description                         |
//! |--------------------------------|-------------------------|-------------------------------------|
//! | `COMFYUI_URL`                  | `http://127.0.0.1:8188` | Server base URL                     |
//! | `COMFYUI_WS_URL`               | derived                 | Event stream base URL               |
//! | `COMFYUI_TIMEOUT_SECS`         | `300`                   | Wait budget per run                 |
//! | `COMFYUI_POLL_INTERVAL_MS`     | `1000`                  | Delay between history polls         |
//! | `COMFYUI_REQUEST_TIMEOUT_SECS` | `5`                     | Per-request and handshake timeout   |
//!
//! Exit status: `0` completed, `1` failed or error, `2` timed out.

mod cli;
mod report;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use comfyrest_comfyui::config::derive_ws_url;
use comfyrest_comfyui::{VerdictStatus, WatchConfig, Watcher};
use comfyrest_core::workflow::WorkflowGraph;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};

const EXIT_FAILED: u8 = 1;
const EXIT_TIMED_OUT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json);

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "comfyrest failed");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "comfyrest=info,comfyrest_comfyui=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries results.
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn dispatch(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run {
            workflow,
            server,
            timeout,
            websocket,
            poll_interval_ms,
        } => {
            let mut config = config_for(server);
            if let Some(secs) = timeout {
                config.timeout = Duration::from_secs(secs);
            }
            if let Some(ms) = poll_interval_ms {
                config.poll_interval = Duration::from_millis(ms);
            }
            run(&workflow, config, websocket).await
        }
        Command::Discover { server, output } => {
            discover(config_for(server), &output).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Params { workflow } => {
            params(&workflow)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Environment configuration, with `--server` replacing both base URLs.
fn config_for(server: Option<String>) -> WatchConfig {
    let mut config = WatchConfig::from_env();
    if let Some(server) = server {
        config.api_url = server.trim_end_matches('/').to_string();
        config.ws_url = derive_ws_url(&config.api_url);
    }
    config
}

async fn run(path: &Path, config: WatchConfig, prefer_stream: bool) -> anyhow::Result<ExitCode> {
    let workflow = load_workflow(path)?;
    let timeout = config.timeout;

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        timeout_secs = timeout.as_secs(),
        prefer_stream,
        "Starting comfyrest run",
    );

    let watcher = Watcher::new(config)?;
    let verdict = watcher
        .run(&workflow, timeout, prefer_stream)
        .await
        .with_context(|| format!("Failed to submit {}", path.display()))?;

    for line in report::verdict_lines(&verdict) {
        println!("{line}");
    }

    Ok(match verdict.status {
        VerdictStatus::Completed => ExitCode::SUCCESS,
        VerdictStatus::Failed => ExitCode::from(EXIT_FAILED),
        VerdictStatus::TimedOut => ExitCode::from(EXIT_TIMED_OUT),
    })
}

async fn discover(config: WatchConfig, output: &Path) -> anyhow::Result<()> {
    let watcher = Watcher::new(config)?;
    let report = watcher
        .api()
        .discover()
        .await
        .with_context(|| format!("Failed to discover {}", watcher.api().api_url()))?;

    let body = serde_json::to_string_pretty(&report)?;
    std::fs::write(output, body)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "found {} route document(s); report written to {}",
        report.candidates.len(),
        output.display(),
    );
    Ok(())
}

fn params(path: &Path) -> anyhow::Result<()> {
    let workflow = load_workflow(path)?;
    let graph = WorkflowGraph::parse(&workflow)
        .with_context(|| format!("Invalid workflow {}", path.display()))?;

    for line in report::parameter_lines(&graph.parameters()) {
        println!("{line}");
    }
    Ok(())
}

fn load_workflow(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}
