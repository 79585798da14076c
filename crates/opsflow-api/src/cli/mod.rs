//! CLI command definitions for the `opsflow` binary.
//!
//! Uses clap derive macros for argument parsing. Workflow management lives
//! under `opsflow workflow <action>`; `dispatch` feeds a domain event from a
//! file; `serve` runs the REST API with the background poller.

pub mod dispatch;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color};

use opsflow_types::execution::{NodeStatus, RunStatus};

/// Automate ops console workflows.
#[derive(Parser)]
#[command(name = "opsflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server and the schedule/resume poller.
    Serve {
        /// Port to listen on (default from config, 3000).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (default from config, 127.0.0.1).
        #[arg(long)]
        host: Option<String>,

        /// Emit log lines as JSON.
        #[arg(long)]
        log_json: bool,

        /// Export spans through OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },

    /// Manage workflow definitions and their runs.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Dispatch a domain event from a JSON file and drive the resulting runs.
    Dispatch {
        /// Path to the event JSON (`{type, payload, event_id, tenant_id}`).
        file: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

// ---------------------------------------------------------------------------
// Shared formatting helpers
// ---------------------------------------------------------------------------

/// Colored table cell for a run status.
pub fn run_status_cell(status: RunStatus) -> Cell {
    let color = match status {
        RunStatus::Completed => Color::Green,
        RunStatus::Failed => Color::Red,
        RunStatus::Aborted => Color::DarkGrey,
        RunStatus::Suspended => Color::Yellow,
        RunStatus::Running => Color::Cyan,
        RunStatus::Pending => Color::White,
    };
    Cell::new(status).fg(color)
}

pub fn node_status_cell(status: NodeStatus) -> Cell {
    let color = match status {
        NodeStatus::Success => Color::Green,
        NodeStatus::Failed => Color::Red,
        NodeStatus::Skipped => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

/// Styled status word for single-line output.
pub fn styled_status(status: RunStatus) -> console::StyledObject<&'static str> {
    let s = console::style(status.as_str());
    match status {
        RunStatus::Completed => s.green(),
        RunStatus::Failed => s.red(),
        RunStatus::Suspended => s.yellow(),
        RunStatus::Aborted => s.dim(),
        RunStatus::Running | RunStatus::Pending => s.cyan(),
    }
}

/// First eight characters of an id, for table columns.
pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
