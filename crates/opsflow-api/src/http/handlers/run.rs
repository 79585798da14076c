//! Execution run handlers: listing, inspection and abort.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_types::execution::{ExecutionRun, RunDetail};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestContext};
use crate::state::AppState;

/// Query parameters for listing workflow runs.
#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    /// Maximum number of runs to return (default 20).
    #[serde(default = "default_run_limit")]
    pub limit: u32,
}

fn default_run_limit() -> u32 {
    20
}

/// GET /api/v1/workflows/:id/runs - Newest runs first.
pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ApiResponse<Vec<ExecutionRun>>>, AppError> {
    let ctx = RequestContext::start();
    // 404 for unknown or deleted workflows rather than an empty list.
    state.definitions.get(&id).await?;
    let runs = state.executions.list_runs(&id, query.limit.clamp(1, 500)).await?;
    Ok(Json(
        ctx.respond(runs)
            .with_link("workflow", &format!("/api/v1/workflows/{id}")),
    ))
}

/// GET /api/v1/runs/:run_id - A run with its node results.
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunDetail>>, AppError> {
    let ctx = RequestContext::start();
    let run = state
        .executions
        .get_run(&run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;
    let node_results = state.executions.node_results(&run_id).await?;

    let workflow_link = format!("/api/v1/workflows/{}", run.workflow_id);
    Ok(Json(
        ctx.respond(RunDetail { run, node_results })
            .with_link("self", &format!("/api/v1/runs/{run_id}"))
            .with_link("workflow", &workflow_link),
    ))
}

/// POST /api/v1/runs/:run_id/abort - Stop a run before its next node.
/// Aborting a finished run is a no-op that reports its final status.
pub async fn abort_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let ctx = RequestContext::start();
    let status = state.engine.abort(run_id).await?;
    Ok(Json(ctx.respond(json!({ "run_id": run_id, "status": status }))))
}
