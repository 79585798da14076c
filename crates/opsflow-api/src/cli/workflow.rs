//! CLI workflow management subcommands.
//!
//! Definition CRUD, toggle, duplicate, manual runs, run history, stats and
//! the import/export codec. Runs started from the CLI are driven inline
//! before the command returns.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_core::workflow::codec::{DocumentFormat, render_document};
use opsflow_types::execution::{ExecutionRun, RunStatus};
use opsflow_types::workflow::{WorkflowDefinition, WorkflowDraft};

use super::{node_status_cell, run_status_cell, short_id, styled_status};
use crate::state::AppState;

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// List workflows with their execution stats.
    #[command(alias = "ls")]
    List,

    /// Show a workflow's graph and stats.
    Show {
        /// Workflow UUID.
        id: Uuid,
    },

    /// Create a workflow from a JSON or YAML draft file.
    Create {
        /// Path to the draft (`.json`, `.yaml` or `.yml`).
        file: PathBuf,
    },

    /// Replace a workflow's graph from a draft file.
    Update {
        /// Workflow UUID.
        id: Uuid,

        /// Path to the draft (`.json`, `.yaml` or `.yml`).
        file: PathBuf,

        /// Fail unless the stored version matches.
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Flip a workflow between active and inactive.
    Toggle {
        /// Workflow UUID.
        id: Uuid,
    },

    /// Copy a workflow (new id, inactive, no history).
    Duplicate {
        /// Workflow UUID.
        id: Uuid,
    },

    /// Delete a workflow and abort its unfinished runs.
    #[command(alias = "rm")]
    Delete {
        /// Workflow UUID.
        id: Uuid,
    },

    /// Start a manual run and drive it until it finishes or suspends.
    Run {
        /// Workflow UUID.
        id: Uuid,

        /// Optional JSON trigger payload.
        #[arg(long)]
        payload: Option<String>,
    },

    /// Export a workflow as a transport document.
    Export {
        /// Workflow UUID.
        id: Uuid,

        /// Document format: json or yaml (default from --out, else json).
        #[arg(long)]
        format: Option<DocumentFormat>,

        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Import a transport document as a new inactive workflow.
    Import {
        /// Path to the document (`.json`, `.yaml` or `.yml`).
        file: PathBuf,
    },

    /// Show recent runs for a workflow, or one run in detail.
    Runs {
        /// Workflow UUID or run UUID.
        target: Uuid,

        /// Maximum number of runs to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Show execution stats for a workflow.
    Stats {
        /// Workflow UUID.
        id: Uuid,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        WorkflowCommand::List => handle_list(state, json).await,
        WorkflowCommand::Show { id } => handle_show(&id, state, json).await,
        WorkflowCommand::Create { file } => handle_create(&file, state, json).await,
        WorkflowCommand::Update {
            id,
            file,
            expected_version,
        } => handle_update(&id, &file, expected_version, state, json).await,
        WorkflowCommand::Toggle { id } => handle_toggle(&id, state, json).await,
        WorkflowCommand::Duplicate { id } => handle_duplicate(&id, state, json).await,
        WorkflowCommand::Delete { id } => handle_delete(&id, state, json).await,
        WorkflowCommand::Run { id, payload } => {
            handle_run(&id, payload.as_deref(), state, json).await
        }
        WorkflowCommand::Export { id, format, out } => {
            handle_export(&id, format, out.as_deref(), state, json).await
        }
        WorkflowCommand::Import { file } => handle_import(&file, state, json).await,
        WorkflowCommand::Runs { target, limit } => handle_runs(&target, limit, state, json).await,
        WorkflowCommand::Stats { id } => handle_stats(&id, state, json).await,
    }
}

/// Parse a draft file's text, YAML or JSON.
fn parse_draft(text: &str, format: DocumentFormat) -> Result<WorkflowDraft> {
    let draft = match format {
        DocumentFormat::Json => serde_json::from_str(text).context("Invalid JSON draft")?,
        DocumentFormat::Yaml => serde_yaml_ng::from_str(text).context("Invalid YAML draft")?,
    };
    Ok(draft)
}

async fn read_draft(file: &Path) -> Result<WorkflowDraft> {
    ensure_draft_extension(file)?;
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    parse_draft(&text, DocumentFormat::from_path(file))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_saved(verb: &str, def: &WorkflowDefinition) {
    println!();
    println!(
        "  {} {verb} workflow '{}'",
        style("*").green().bold(),
        style(&def.name).cyan()
    );
    println!("  ID: {}", def.id);
    println!("  Version: {}", def.version);
    println!("  Trigger: {}", def.trigger_type);
    println!("  Nodes: {}  Edges: {}", def.nodes.len(), def.edges.len());
    println!(
        "  Active: {}",
        if def.is_active { "yes" } else { "no" }
    );
    println!();
}

// ---------------------------------------------------------------------------
// List / Show
// ---------------------------------------------------------------------------

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let summaries = state.definitions.list().await?;

    if json {
        return print_json(&summaries);
    }

    if summaries.is_empty() {
        println!();
        println!("  No workflows yet.");
        println!(
            "  Create one with: {}",
            style("opsflow workflow create <draft.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Trigger"),
            Cell::new("Active"),
            Cell::new("Version"),
            Cell::new("Runs"),
            Cell::new("OK / Failed"),
            Cell::new("Last run"),
        ]);

    for s in &summaries {
        let d = &s.definition;
        let active = if d.is_active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        let last_run = s
            .stats
            .last_run
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(short_id(&d.id)),
            Cell::new(&d.name),
            Cell::new(d.trigger_type.event_name()),
            active,
            Cell::new(d.version),
            Cell::new(s.stats.total_executions),
            Cell::new(format!(
                "{} / {}",
                s.stats.successful_executions, s.stats.failed_executions
            )),
            Cell::new(last_run),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let def = state.definitions.get(id).await?;
    let stats = state.definitions.stats(id).await?;

    if json {
        return print_json(&serde_json::json!({ "workflow": def, "stats": stats }));
    }

    print_saved("Workflow", &def);
    if let Some(desc) = &def.description {
        println!("  {}", style(desc).dim());
        println!();
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Next"),
        ]);
    for node in &def.nodes {
        let next: Vec<String> = def
            .edges
            .iter()
            .filter(|e| e.from_node == node.id)
            .map(|e| match &e.branch_label {
                Some(label) => format!("{} [{label}]", e.to_node),
                None => e.to_node.clone(),
            })
            .collect();
        table.add_row(vec![
            Cell::new(&node.id),
            Cell::new(&node.node_type),
            Cell::new(if next.is_empty() { "-".to_string() } else { next.join(", ") }),
        ]);
    }
    println!("{table}");
    println!();
    println!(
        "  Runs: {}  ({} completed, {} failed)",
        stats.total_executions, stats.successful_executions, stats.failed_executions
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Create / Update
// ---------------------------------------------------------------------------

async fn handle_create(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let draft = read_draft(file).await?;
    let def = state.definitions.create(draft).await?;

    if json {
        return print_json(&def);
    }
    print_saved("Created", &def);
    Ok(())
}

async fn handle_update(
    id: &Uuid,
    file: &Path,
    expected_version: Option<u64>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let draft = read_draft(file).await?;
    let def = state.definitions.update(id, draft, expected_version).await?;

    if json {
        return print_json(&def);
    }
    print_saved("Updated", &def);
    Ok(())
}

// ---------------------------------------------------------------------------
// Toggle / Duplicate / Delete
// ---------------------------------------------------------------------------

async fn handle_toggle(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let is_active = state.definitions.toggle_active(id).await?;

    if json {
        return print_json(&serde_json::json!({ "id": id, "is_active": is_active }));
    }
    println!();
    println!(
        "  {} Workflow {} is now {}",
        style("*").green().bold(),
        style(short_id(id)).cyan(),
        if is_active {
            style("active").green()
        } else {
            style("inactive").dim()
        }
    );
    println!();
    Ok(())
}

async fn handle_duplicate(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let copy = state.definitions.duplicate(id).await?;

    if json {
        return print_json(&copy);
    }
    print_saved("Duplicated into", &copy);
    Ok(())
}

async fn handle_delete(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    state.definitions.delete(id).await?;

    if json {
        return print_json(&serde_json::json!({ "id": id, "deleted": true }));
    }
    println!();
    println!(
        "  {} Deleted workflow {}",
        style("*").green().bold(),
        style(short_id(id)).cyan()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn handle_run(
    id: &Uuid,
    payload: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let payload = match payload {
        Some(raw) => serde_json::from_str(raw).context("Invalid JSON payload")?,
        None => serde_json::json!({}),
    };

    let request = state.dispatcher.run_manual(id, payload).await?;
    let outcomes = state.drive_launched().await?;
    let status = outcomes
        .iter()
        .find(|(run_id, _)| *run_id == request.run_id)
        .map(|(_, status)| *status);

    let run = state
        .executions
        .get_run(&request.run_id)
        .await?
        .context("Run disappeared after start")?;

    if json {
        return print_json(&run);
    }

    println!();
    println!(
        "  {} Run {} finished as {}",
        style("*").green().bold(),
        style(short_id(&run.id)).cyan(),
        styled_status(status.unwrap_or(run.status))
    );
    print_run_tail(&run);
    Ok(())
}

fn print_run_tail(run: &ExecutionRun) {
    if let Some(err) = &run.error {
        println!("  Error: {}", style(err).red());
    }
    if run.status == RunStatus::Suspended {
        if let (Some(node), Some(at)) = (&run.suspended_node, run.resume_at) {
            println!(
                "  Waiting at '{node}' until {} ({})",
                at.format("%Y-%m-%d %H:%M:%S UTC"),
                style("resumed by `opsflow serve`").dim()
            );
        }
    }
    println!(
        "  Details: {}",
        style(format!("opsflow workflow runs {}", run.id)).dim()
    );
    println!();
}

// ---------------------------------------------------------------------------
// Export / Import
// ---------------------------------------------------------------------------

async fn handle_export(
    id: &Uuid,
    format: Option<DocumentFormat>,
    out: Option<&Path>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let format = format
        .or_else(|| out.map(DocumentFormat::from_path))
        .unwrap_or_default();
    let doc = state.definitions.export(id).await?;
    let text = render_document(&doc, format)?;

    let Some(path) = out else {
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
        return Ok(());
    };

    tokio::fs::write(path, &text)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if json {
        return print_json(&serde_json::json!({
            "id": id,
            "format": format.to_string(),
            "path": path.display().to_string(),
        }));
    }
    println!();
    println!(
        "  {} Exported '{}' to {}",
        style("*").green().bold(),
        style(&doc.workflow.name).cyan(),
        path.display()
    );
    println!();
    Ok(())
}

async fn handle_import(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let id = state
        .definitions
        .import_text(&text, DocumentFormat::from_path(file))
        .await?;
    let def = state.definitions.get(&id).await?;

    if json {
        return print_json(&def);
    }
    print_saved("Imported", &def);
    println!(
        "  Activate with: {}",
        style(format!("opsflow workflow toggle {id}")).dim()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Runs / Stats
// ---------------------------------------------------------------------------

async fn handle_runs(target: &Uuid, limit: u32, state: &AppState, json: bool) -> Result<()> {
    // A run id shows that run; anything else must be a workflow id.
    if let Some(run) = state.executions.get_run(target).await? {
        return display_single_run(run, state, json).await;
    }

    let def = state.definitions.get(target).await.with_context(|| {
        format!("No workflow or run found for '{target}'")
    })?;
    let runs = state.executions.list_runs(&def.id, limit.max(1)).await?;

    if json {
        return print_json(&runs);
    }

    if runs.is_empty() {
        println!();
        println!("  No runs for workflow '{}'.", def.name);
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run ID").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Trigger"),
            Cell::new("Version"),
            Cell::new("Created"),
            Cell::new("Finished"),
        ]);

    for r in &runs {
        let finished = r
            .finished_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(short_id(&r.id)),
            run_status_cell(r.status),
            Cell::new(r.trigger_type.event_name()),
            Cell::new(r.pinned_version),
            Cell::new(r.created_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(finished),
        ]);
    }

    println!();
    println!("  Runs for workflow '{}'", style(&def.name).cyan());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn display_single_run(run: ExecutionRun, state: &AppState, json: bool) -> Result<()> {
    let results = state.executions.node_results(&run.id).await?;

    if json {
        return print_json(&opsflow_types::execution::RunDetail {
            run,
            node_results: results,
        });
    }

    println!();
    println!(
        "  {} Run {}",
        style("Workflow run:").bold(),
        style(run.id).cyan()
    );
    println!("  Workflow: {} (v{})", run.workflow_id, run.pinned_version);
    println!("  Status: {}", styled_status(run.status));
    println!("  Trigger: {}", run.trigger_type);
    if let Some(event_id) = &run.event_id {
        println!("  Event: {event_id}");
    }
    println!();

    if !results.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Node").fg(Color::Cyan),
                Cell::new("Status"),
                Cell::new("Attempts"),
                Cell::new("Error"),
            ]);
        for r in &results {
            table.add_row(vec![
                Cell::new(&r.node_id),
                node_status_cell(r.status),
                Cell::new(r.attempt_count),
                Cell::new(r.error.as_deref().unwrap_or("-")),
            ]);
        }
        println!("{table}");
        println!();
    }

    if let Some(err) = &run.error {
        println!("  Error: {}", style(err).red());
        println!();
    }
    Ok(())
}

async fn handle_stats(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let stats = state.definitions.stats(id).await?;

    if json {
        return print_json(&stats);
    }

    let success_rate = if stats.total_executions == 0 {
        "-".to_string()
    } else {
        format!(
            "{:.0}%",
            stats.successful_executions as f64 * 100.0 / stats.total_executions as f64
        )
    };

    println!();
    println!("  {} {}", style("Stats for").bold(), style(id).cyan());
    println!("  Total runs:   {}", stats.total_executions);
    println!("  Completed:    {}", style(stats.successful_executions).green());
    println!("  Failed:       {}", style(stats.failed_executions).red());
    println!("  Success rate: {success_rate}");
    println!(
        "  Last run:     {}",
        stats
            .last_run
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    Ok(())
}

/// Reject a draft file that is neither JSON nor YAML by extension.
fn ensure_draft_extension(file: &Path) -> Result<()> {
    match file.extension().and_then(|e| e.to_str()) {
        Some("json" | "yaml" | "yml") => Ok(()),
        _ => bail!(
            "Unsupported draft file '{}': expected .json, .yaml or .yml",
            file.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LaunchMode;
    use opsflow_infra::sqlite::pool::DatabasePool;
    use opsflow_types::config::OpsflowConfig;
    use opsflow_types::workflow::TriggerType;

    const YAML_DRAFT: &str = r#"
name: Welcome new customer
trigger_type: customer_created
is_active: true
nodes:
  - id: start
    type: trigger
  - id: greet
    type: action
    config:
      action: send_email
      params:
        to: "{{trigger.email}}"
edges:
  - from_node: start
    to_node: greet
"#;

    async fn inline_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cli.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        let state = AppState::from_parts(
            pool,
            OpsflowConfig::default(),
            dir.path().to_path_buf(),
            LaunchMode::Inline,
        )
        .unwrap();
        (state, dir)
    }

    #[test]
    fn yaml_and_json_drafts_parse_alike() {
        let from_yaml = parse_draft(YAML_DRAFT, DocumentFormat::Yaml).unwrap();
        let as_json = serde_json::to_string(&from_yaml).unwrap();
        let from_json = parse_draft(&as_json, DocumentFormat::Json).unwrap();

        assert_eq!(from_yaml.trigger_type, TriggerType::CustomerCreated);
        assert_eq!(from_json.nodes, from_yaml.nodes);
        assert_eq!(from_json.edges, from_yaml.edges);
        assert!(parse_draft("name: [", DocumentFormat::Yaml).is_err());
    }

    #[test]
    fn draft_extension_check() {
        assert!(ensure_draft_extension(Path::new("a.yml")).is_ok());
        assert!(ensure_draft_extension(Path::new("a.json")).is_ok());
        assert!(ensure_draft_extension(Path::new("a.txt")).is_err());
    }

    #[tokio::test]
    async fn create_run_and_inspect_from_files() {
        let (state, dir) = inline_state().await;
        let draft_path = dir.path().join("welcome.yaml");
        tokio::fs::write(&draft_path, YAML_DRAFT).await.unwrap();

        handle_create(&draft_path, &state, true).await.unwrap();
        let summaries = state.definitions.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        let id = summaries[0].definition.id;

        handle_run(&id, Some(r#"{"email":"new@example.com"}"#), &state, true)
            .await
            .unwrap();
        let runs = state.executions.list_runs(&id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(
            runs[0].context["greet"]["params"]["to"],
            "new@example.com"
        );

        handle_runs(&id, 5, &state, true).await.unwrap();
        handle_runs(&runs[0].id, 5, &state, true).await.unwrap();
        assert!(handle_runs(&Uuid::now_v7(), 5, &state, true).await.is_err());

        let stats = state.definitions.stats(&id).await.unwrap();
        assert_eq!(stats.total_executions, 1);
    }

    #[tokio::test]
    async fn export_then_import_through_files() {
        let (state, dir) = inline_state().await;
        let draft = parse_draft(YAML_DRAFT, DocumentFormat::Yaml).unwrap();
        let def = state.definitions.create(draft).await.unwrap();

        let out = dir.path().join("welcome.export.yml");
        handle_export(&def.id, None, Some(&out), &state, true)
            .await
            .unwrap();
        let text = tokio::fs::read_to_string(&out).await.unwrap();
        assert!(text.contains("version:"));

        handle_import(&out, &state, true).await.unwrap();
        let summaries = state.definitions.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        let imported = summaries
            .iter()
            .find(|s| s.definition.id != def.id)
            .unwrap();
        assert!(!imported.definition.is_active);
        assert_eq!(imported.definition.nodes, def.nodes);
    }

    #[tokio::test]
    async fn stale_update_from_file_fails() {
        let (state, dir) = inline_state().await;
        let draft = parse_draft(YAML_DRAFT, DocumentFormat::Yaml).unwrap();
        let def = state.definitions.create(draft).await.unwrap();
        let path = dir.path().join("edit.yaml");
        tokio::fs::write(&path, YAML_DRAFT).await.unwrap();

        handle_update(&def.id, &path, Some(1), &state, true)
            .await
            .unwrap();
        assert!(
            handle_update(&def.id, &path, Some(1), &state, true)
                .await
                .is_err()
        );
        assert_eq!(state.definitions.get(&def.id).await.unwrap().version, 2);
    }
}
