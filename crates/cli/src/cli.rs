//! Command-line interface for `comfyrest`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Submit ComfyUI workflows and wait for a single verdict per run.
#[derive(Debug, Parser)]
#[command(name = "comfyrest", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a workflow and wait for it to complete, fail or time out.
    Run {
        /// Path to an execution-ready (API format) workflow JSON file.
        workflow: PathBuf,

        /// ComfyUI base URL. Overrides `COMFYUI_URL`.
        #[arg(long)]
        server: Option<String>,

        /// Overall wait budget in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Prefer the WebSocket event stream over history polling.
        #[arg(long, default_value_t = false)]
        websocket: bool,

        /// Delay between history polls in milliseconds.
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },

    /// Query the server for its HTTP surface and write a report.
    Discover {
        /// ComfyUI base URL. Overrides `COMFYUI_URL`.
        #[arg(long)]
        server: Option<String>,

        /// Where to write the JSON report.
        #[arg(long, default_value = "endpoints.json")]
        output: PathBuf,
    },

    /// List the literal inputs of every node in a workflow.
    Params {
        /// Path to an execution-ready (API format) workflow JSON file.
        workflow: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "comfyrest",
            "run",
            "wf.json",
            "--server",
            "http://gpu:8188",
            "--timeout",
            "60",
            "--websocket",
            "--poll-interval-ms",
            "250",
        ]);
        match cli.command {
            Command::Run {
                workflow,
                server,
                timeout,
                websocket,
                poll_interval_ms,
            } => {
                assert_eq!(workflow, PathBuf::from("wf.json"));
                assert_eq!(server.as_deref(), Some("http://gpu:8188"));
                assert_eq!(timeout, Some(60));
                assert!(websocket);
                assert_eq!(poll_interval_ms, Some(250));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn discover_defaults_output_path() {
        let cli = Cli::parse_from(["comfyrest", "discover", "--json"]);
        assert!(cli.json);
        match cli.command {
            Command::Discover { server, output } => {
                assert!(server.is_none());
                assert_eq!(output, PathBuf::from("endpoints.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
