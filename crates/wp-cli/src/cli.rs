//! Argument parsing for the `waypoint` binary.

use crate::demo;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Waypoint: host for the multi-agent runtime.
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run the demo agent graph against a message.
    Demo(DemoArgs),

    /// Write or validate an agent bundle file.
    #[command(subcommand)]
    Bundle(BundleCommand),

    /// List recent top-level runs.
    Runs {
        /// Only runs of this agent.
        agent: Option<String>,
    },

    /// Print the full trace of a run as JSON.
    Trace {
        run_id: Uuid,
    },
}

#[derive(Args, Debug, PartialEq)]
pub struct DemoArgs {
    /// Agent to run.
    #[arg(default_value = demo::COORDINATOR)]
    pub agent: String,

    /// User message.
    #[arg(default_value = "What's the weather in Tokyo and what is 5 + 7?")]
    pub message: String,

    /// Approve every guarded tool call without prompting.
    #[arg(long)]
    pub unattended: bool,

    /// Memory user id; enables recall and storage.
    #[arg(long)]
    pub user: Option<String>,

    /// File to attach (repeatable).
    #[arg(long = "file")]
    pub files: Vec<PathBuf>,

    /// Persist the conversation history when the run succeeds.
    #[arg(long)]
    pub save_history: bool,

    /// JSON file with per-run tool, MCP and agent configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum BundleCommand {
    /// Export the demo graph as a bundle.
    Export { path: PathBuf },
    /// Assemble a bundle against the demo tools and report errors.
    Check { path: PathBuf },
}
