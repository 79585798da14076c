//! Inbound trigger handlers: domain events and webhook deliveries.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use opsflow_core::workflow::dispatcher::signing_secret;
use opsflow_infra::webhook::{SIGNATURE_HEADER, verify_header};
use opsflow_types::execution::DomainEvent;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestContext};
use crate::state::AppState;

/// Header a webhook sender may use to identify a delivery for dedup.
pub const EVENT_ID_HEADER: &str = "X-Event-Id";

/// POST /api/v1/events - Dispatch a domain event to every matching active
/// workflow. Redelivered events create no new runs.
pub async fn dispatch_event(
    State(state): State<AppState>,
    Json(event): Json<DomainEvent>,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), AppError> {
    let ctx = RequestContext::start();
    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.event_id,
        tenant_id = event.tenant_id.as_deref().unwrap_or("-"),
        "domain event received"
    );

    let runs = state.dispatcher.dispatch(&event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ctx.respond(json!({
            "event_id": event.event_id,
            "runs": runs,
        }))),
    ))
}

/// POST /api/v1/webhooks/:workflow_id - Trigger a webhook workflow.
///
/// When the trigger node carries a `signing_secret`, the raw body must be
/// signed in the `X-Opsflow-Signature` header. The delivery id comes from
/// `X-Event-Id`, else the payload's `event_id` or `id`, else a fresh UUID.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), AppError> {
    let ctx = RequestContext::start();

    let def = state.definitions.get(&workflow_id).await?;
    if let Some(secret) = signing_secret(&def) {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        verify_header(secret, &body, signature).map_err(|e| {
            tracing::warn!(workflow_id = %workflow_id, error = %e, "webhook rejected");
            AppError::Unauthorized(e.to_string())
        })?;
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Webhook body is not valid JSON: {e}")))?;
    let event_id = delivery_id(&headers, &payload);

    let created = state
        .dispatcher
        .dispatch_webhook(&workflow_id, &event_id, payload)
        .await?;

    let data = match &created {
        Some(request) => json!({ "event_id": event_id, "duplicate": false, "run": request }),
        None => json!({ "event_id": event_id, "duplicate": true }),
    };
    let mut resp = ctx.respond(data).with_link("workflow", &format!("/api/v1/workflows/{workflow_id}"));
    if let Some(request) = &created {
        resp = resp.with_link("run", &format!("/api/v1/runs/{}", request.run_id));
    }
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

fn delivery_id(headers: &HeaderMap, payload: &Value) -> String {
    headers
        .get(EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            ["event_id", "id"].iter().find_map(|key| match payload.get(*key) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        })
        .unwrap_or_else(|| Uuid::now_v7().to_string())
}
