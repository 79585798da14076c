//! `opsflow dispatch <event.json>`: feed one domain event through the
//! dispatcher and drive every run it creates.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use opsflow_types::execution::DomainEvent;

use super::{run_status_cell, short_id};
use crate::state::AppState;

fn parse_event(text: &str) -> Result<DomainEvent> {
    serde_json::from_str(text).context("Invalid event JSON: expected {type, payload, event_id}")
}

pub async fn handle_dispatch(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let event = parse_event(&text)?;

    let created = state.dispatcher.dispatch(&event).await?;
    let outcomes = state.drive_launched().await?;

    if json {
        let runs: Vec<_> = created
            .iter()
            .map(|req| {
                let status = outcomes
                    .iter()
                    .find(|(id, _)| *id == req.run_id)
                    .map(|(_, s)| s.as_str());
                serde_json::json!({
                    "run_id": req.run_id,
                    "workflow_id": req.workflow_id,
                    "pinned_version": req.pinned_version,
                    "status": status,
                })
            })
            .collect();
        let out = serde_json::json!({ "event_id": event.event_id, "runs": runs });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if created.is_empty() {
        println!(
            "  {} Event '{}' started no runs (no active workflow, or already dispatched).",
            style("-").dim(),
            style(&event.event_id).cyan()
        );
        println!();
        return Ok(());
    }

    println!(
        "  {} Event '{}' ({}) started {} run(s)",
        style("*").green().bold(),
        style(&event.event_id).cyan(),
        event.event_type,
        created.len()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Version"),
            Cell::new("Status"),
        ]);
    for (run_id, status) in &outcomes {
        let Some(req) = created.iter().find(|r| r.run_id == *run_id) else {
            continue;
        };
        table.add_row(vec![
            Cell::new(short_id(run_id)),
            Cell::new(short_id(&req.workflow_id)),
            Cell::new(req.pinned_version),
            run_status_cell(*status),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}
