//! Workflow definition handlers for the REST API.
//!
//! CRUD, toggle, duplicate, manual run, stats and the import/export codec.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use opsflow_core::event::bus::RunWatch;
use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_core::workflow::codec::{DocumentFormat, render_document};
use opsflow_types::execution::{ExecutionRequest, RunStatus};
use opsflow_types::workflow::{WorkflowDefinition, WorkflowDraft, WorkflowStats, WorkflowSummary};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestContext};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies and query parameters
// ---------------------------------------------------------------------------

/// PUT body: the new graph plus an optional optimistic-lock version.
#[derive(Debug, Deserialize)]
pub struct UpdateWorkflowBody {
    #[serde(flatten)]
    pub draft: WorkflowDraft,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// `?wait_secs=N` holds the response until the run settles or N seconds
/// pass, capped at [`MAX_RUN_WAIT_SECS`].
#[derive(Debug, Deserialize)]
pub struct RunQuery {
    #[serde(default)]
    pub wait_secs: Option<u64>,
}

pub const MAX_RUN_WAIT_SECS: u64 = 60;

/// A started manual run. `status` is present when the caller waited and the
/// run settled in time.
#[derive(Debug, Serialize)]
pub struct ManualRun {
    #[serde(flatten)]
    pub request: ExecutionRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

fn workflow_link(id: &Uuid) -> String {
    format!("/api/v1/workflows/{id}")
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows - Create a workflow definition.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(draft): Json<WorkflowDraft>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowDefinition>>), AppError> {
    let ctx = RequestContext::start();
    let def = state.definitions.create(draft).await?;
    let link = workflow_link(&def.id);
    Ok((
        StatusCode::CREATED,
        Json(ctx.respond(def).with_link("self", &link)),
    ))
}

/// GET /api/v1/workflows - List live workflow definitions with stats.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowSummary>>>, AppError> {
    let ctx = RequestContext::start();
    let summaries = state.definitions.list().await?;
    Ok(Json(ctx.respond(summaries).with_link("self", "/api/v1/workflows")))
}

/// GET /api/v1/workflows/:id
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let ctx = RequestContext::start();
    let def = state.definitions.get(&id).await?;
    let link = workflow_link(&id);
    Ok(Json(
        ctx.respond(def)
            .with_link("self", &link)
            .with_link("runs", &format!("{link}/runs"))
            .with_link("stats", &format!("{link}/stats")),
    ))
}

/// PUT /api/v1/workflows/:id - Replace the graph, bumping the version.
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateWorkflowBody>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let ctx = RequestContext::start();
    let def = state
        .definitions
        .update(&id, body.draft, body.expected_version)
        .await?;
    Ok(Json(ctx.respond(def).with_link("self", &workflow_link(&id))))
}

/// DELETE /api/v1/workflows/:id - Soft delete; aborts non-terminal runs.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let ctx = RequestContext::start();
    state.definitions.delete(&id).await?;
    Ok(Json(ctx.respond(json!({ "id": id, "deleted": true }))))
}

/// POST /api/v1/workflows/:id/toggle
pub async fn toggle_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let ctx = RequestContext::start();
    let is_active = state.definitions.toggle_active(&id).await?;
    Ok(Json(
        ctx.respond(json!({ "id": id, "is_active": is_active }))
            .with_link("workflow", &workflow_link(&id)),
    ))
}

/// POST /api/v1/workflows/:id/duplicate
pub async fn duplicate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowDefinition>>), AppError> {
    let ctx = RequestContext::start();
    let copy = state.definitions.duplicate(&id).await?;
    let link = workflow_link(&copy.id);
    Ok((
        StatusCode::CREATED,
        Json(
            ctx.respond(copy)
                .with_link("self", &link)
                .with_link("source", &workflow_link(&id)),
        ),
    ))
}

/// GET /api/v1/workflows/:id/stats
pub async fn workflow_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowStats>>, AppError> {
    let ctx = RequestContext::start();
    let stats = state.definitions.stats(&id).await?;
    Ok(Json(ctx.respond(stats).with_link("workflow", &workflow_link(&id))))
}

// ---------------------------------------------------------------------------
// Manual run
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows/:id/run - Start a manual run. The body (optional)
/// is the trigger payload. Answers 202, or 200 once a waited-for run settled.
pub async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RunQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<ManualRun>>), AppError> {
    let ctx = RequestContext::start();
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid JSON payload: {e}")))?
    };

    // Subscribe before launching so the settling event cannot be missed.
    let pending = query.wait_secs.map(|_| state.event_bus.subscribe());
    let request = state.dispatcher.run_manual(&id, payload).await?;

    let mut status = None;
    if let (Some(receiver), Some(secs)) = (pending, query.wait_secs) {
        let limit = std::time::Duration::from_secs(secs.min(MAX_RUN_WAIT_SECS));
        if RunWatch::new(receiver, request.run_id)
            .settled(limit)
            .await
            .is_some()
        {
            status = state
                .executions
                .get_run(&request.run_id)
                .await?
                .map(|run| run.status);
        }
    }

    let run_link = format!("/api/v1/runs/{}", request.run_id);
    let code = if status.is_some() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        code,
        Json(ctx.respond(ManualRun { request, status }).with_link("run", &run_link)),
    ))
}

// ---------------------------------------------------------------------------
// Import / export
// ---------------------------------------------------------------------------

/// GET /api/v1/workflows/:id/export - `?format=yaml` returns the raw YAML
/// document; JSON is wrapped in the envelope.
pub async fn export_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let ctx = RequestContext::start();
    let format = match query.format.as_deref() {
        Some(f) => f.parse::<DocumentFormat>().map_err(AppError::Validation)?,
        None => DocumentFormat::Json,
    };

    let doc = state.definitions.export(&id).await?;
    match format {
        DocumentFormat::Yaml => {
            let text = render_document(&doc, format)?;
            Ok(([(header::CONTENT_TYPE, "application/yaml")], text).into_response())
        }
        DocumentFormat::Json => Ok(Json(ctx.respond(doc)).into_response()),
    }
}

/// POST /api/v1/workflows/import - Create an inactive workflow from a
/// transport document (JSON, or YAML with a yaml content type).
pub async fn import_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowDefinition>>), AppError> {
    let ctx = RequestContext::start();
    let format = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| ct.contains("yaml"))
        .map_or(DocumentFormat::Json, |_| DocumentFormat::Yaml);
    let text = std::str::from_utf8(&body)
        .map_err(|_| AppError::Validation("Document is not valid UTF-8".to_string()))?;

    let id = state.definitions.import_text(text, format).await?;
    let def = state.definitions.get(&id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ctx.respond(def).with_link("self", &workflow_link(&id))),
    ))
}
