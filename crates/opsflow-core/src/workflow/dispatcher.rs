//! Trigger dispatcher: turns inbound events into pending runs.
//!
//! Every entry point pins the definition's current version, stores a pending
//! `ExecutionRun` and hands its id to a [`RunLauncher`]. Event-driven runs
//! carry an idempotency key derived from `(event_id, workflow_id)`; the
//! execution store's unique index on that key is the dedup table, so
//! dispatching the same event twice, from one process or several, yields a
//! single run per workflow.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::{DomainEvent, ExecutionRequest, ExecutionRun};
use opsflow_types::workflow::{Node, TriggerType, WorkflowDefinition};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::graph::TRIGGER_NODE;
use super::schedule::tick_event_id;
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

/// Receives freshly created pending runs.
///
/// The engine-backed implementation spawns a task per run; tests record ids.
pub trait RunLauncher: Send + Sync {
    fn launch(&self, run_id: Uuid);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown event type: '{0}'")]
    UnknownEventType(String),

    #[error("{0} workflows cannot be started by a domain event")]
    UnroutableTrigger(TriggerType),

    #[error("event has no event_id")]
    MissingEventId,

    #[error("malformed payload for workflow {workflow_id}: {reason}")]
    MalformedPayload { workflow_id: Uuid, reason: String },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow expects {expected} triggers, got {actual}")]
    TriggerMismatch {
        expected: TriggerType,
        actual: TriggerType,
    },

    #[error("workflow {0} is inactive")]
    Inactive(Uuid),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// SHA-256 hex of `"{event_id}:{workflow_id}"`.
pub fn idempotency_key(event_id: &str, workflow_id: &Uuid) -> String {
    format!(
        "{:x}",
        Sha256::digest(format!("{event_id}:{workflow_id}").as_bytes())
    )
}

fn trigger_node(def: &WorkflowDefinition) -> Option<&Node> {
    def.nodes.iter().find(|n| n.node_type == TRIGGER_NODE)
}

/// The webhook signing secret configured on the trigger node, if any.
pub fn signing_secret(def: &WorkflowDefinition) -> Option<&str> {
    trigger_node(def)
        .and_then(|n| n.config_str("signing_secret"))
        .filter(|s| !s.is_empty())
}

/// Check a webhook payload against the trigger node's `required_fields`.
/// The payload must be an object holding a non-null value for every field.
pub fn check_webhook_payload(def: &WorkflowDefinition, payload: &Value) -> Result<(), String> {
    let Value::Object(map) = payload else {
        return Err("payload must be a JSON object".to_string());
    };

    let required: Vec<&str> = trigger_node(def)
        .and_then(|n| n.config.get("required_fields"))
        .and_then(Value::as_array)
        .map(|fields| fields.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let missing: Vec<&str> = required
        .into_iter()
        .filter(|field| map.get(*field).is_none_or(Value::is_null))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing required fields: {}", missing.join(", ")))
    }
}

// ---------------------------------------------------------------------------
// TriggerDispatcher
// ---------------------------------------------------------------------------

pub struct TriggerDispatcher<W: WorkflowRepository, E: ExecutionRepository> {
    workflows: Arc<W>,
    executions: Arc<E>,
    launcher: Arc<dyn RunLauncher>,
}

impl<W: WorkflowRepository, E: ExecutionRepository> TriggerDispatcher<W, E> {
    pub fn new(workflows: Arc<W>, executions: Arc<E>, launcher: Arc<dyn RunLauncher>) -> Self {
        Self {
            workflows,
            executions,
            launcher,
        }
    }

    /// Dispatch a domain event to every active definition of its type.
    ///
    /// Returns only the runs created by this call; definitions that already
    /// have a run for this event are skipped silently. A failure for one
    /// definition is logged and does not stop the others.
    pub async fn dispatch(
        &self,
        event: &DomainEvent,
    ) -> Result<Vec<ExecutionRequest>, DispatchError> {
        let trigger_type = TriggerType::from_event_type(&event.event_type)
            .ok_or_else(|| DispatchError::UnknownEventType(event.event_type.clone()))?;
        if !trigger_type.is_domain_event() {
            return Err(DispatchError::UnroutableTrigger(trigger_type));
        }
        let event_id = event.event_id.trim();
        if event_id.is_empty() {
            return Err(DispatchError::MissingEventId);
        }

        let defs = self.workflows.list_active_by_trigger(trigger_type).await?;
        tracing::debug!(
            event_id,
            tenant_id = ?event.tenant_id,
            trigger_type = %trigger_type,
            matched = defs.len(),
            "dispatching event"
        );

        let mut created = Vec::new();
        for def in &defs {
            match self
                .start(def, trigger_type, Some(event_id), event.payload.clone())
                .await
            {
                Ok(Some(request)) => created.push(request),
                Ok(None) => {
                    tracing::debug!(event_id, workflow_id = %def.id, "duplicate event ignored");
                }
                Err(e) => {
                    tracing::warn!(
                        event_id,
                        workflow_id = %def.id,
                        error = %e,
                        "failed to create run for event"
                    );
                }
            }
        }
        Ok(created)
    }

    /// Dispatch an inbound webhook delivery to one webhook workflow.
    ///
    /// Returns `None` when this delivery was already dispatched.
    pub async fn dispatch_webhook(
        &self,
        workflow_id: &Uuid,
        event_id: &str,
        payload: Value,
    ) -> Result<Option<ExecutionRequest>, DispatchError> {
        let def = self.load(workflow_id).await?;
        if def.trigger_type != TriggerType::Webhook {
            return Err(DispatchError::TriggerMismatch {
                expected: def.trigger_type,
                actual: TriggerType::Webhook,
            });
        }
        if !def.is_active {
            return Err(DispatchError::Inactive(def.id));
        }
        if event_id.trim().is_empty() {
            return Err(DispatchError::MissingEventId);
        }
        check_webhook_payload(&def, &payload).map_err(|reason| {
            DispatchError::MalformedPayload {
                workflow_id: def.id,
                reason,
            }
        })?;

        Ok(self
            .start(&def, TriggerType::Webhook, Some(event_id.trim()), payload)
            .await?)
    }

    /// Dispatch one schedule tick. Returns `None` when the tick already
    /// produced a run.
    pub async fn dispatch_schedule_tick(
        &self,
        def: &WorkflowDefinition,
        tick: DateTime<Utc>,
    ) -> Result<Option<ExecutionRequest>, DispatchError> {
        let event_id = tick_event_id(&def.id, tick);
        let payload = serde_json::json!({ "scheduled_at": tick.to_rfc3339() });
        Ok(self
            .start(def, TriggerType::Schedule, Some(&event_id), payload)
            .await?)
    }

    /// Start a run on demand. Ignores `is_active` and never deduplicates.
    pub async fn run_manual(
        &self,
        workflow_id: &Uuid,
        payload: Value,
    ) -> Result<ExecutionRequest, DispatchError> {
        let def = self.load(workflow_id).await?;
        let request = self.start(&def, TriggerType::Manual, None, payload).await?;
        // Runs without a key are always inserted.
        request.ok_or(DispatchError::Repository(RepositoryError::Conflict(
            "manual run was not created".to_string(),
        )))
    }

    async fn load(&self, workflow_id: &Uuid) -> Result<WorkflowDefinition, DispatchError> {
        self.workflows
            .get_definition(workflow_id)
            .await?
            .ok_or(DispatchError::WorkflowNotFound(*workflow_id))
    }

    /// Create the pending run and launch it.
    async fn start(
        &self,
        def: &WorkflowDefinition,
        trigger_type: TriggerType,
        event_id: Option<&str>,
        payload: Value,
    ) -> Result<Option<ExecutionRequest>, RepositoryError> {
        let mut run = ExecutionRun::pending(def, trigger_type, payload);
        if let Some(event_id) = event_id {
            run = run.with_event(event_id, idempotency_key(event_id, &def.id));
        }

        if !self.executions.create_run_if_absent(&run).await? {
            return Ok(None);
        }

        tracing::info!(
            run_id = %run.id,
            workflow_id = %def.id,
            version = def.version,
            trigger_type = %trigger_type,
            "run created"
        );
        self.launcher.launch(run.id);
        Ok(Some(ExecutionRequest::from(&run)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{InMemoryExecutionRepository, InMemoryWorkflowRepository};
    use crate::workflow::definition::DefinitionService;
    use crate::workflow::fixtures::{draft, linear_draft};
    use opsflow_types::execution::RunStatus;
    use opsflow_types::workflow::WorkflowDraft;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<Uuid>>,
    }

    impl RecordingLauncher {
        fn count(&self) -> usize {
            self.launched.lock().unwrap().len()
        }
    }

    impl RunLauncher for RecordingLauncher {
        fn launch(&self, run_id: Uuid) {
            self.launched.lock().unwrap().push(run_id);
        }
    }

    struct Harness {
        dispatcher: TriggerDispatcher<InMemoryWorkflowRepository, InMemoryExecutionRepository>,
        definitions: DefinitionService<InMemoryWorkflowRepository, InMemoryExecutionRepository>,
        executions: Arc<InMemoryExecutionRepository>,
        launcher: Arc<RecordingLauncher>,
    }

    fn harness() -> Harness {
        let workflows = Arc::new(InMemoryWorkflowRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let launcher = Arc::new(RecordingLauncher::default());
        Harness {
            dispatcher: TriggerDispatcher::new(
                workflows.clone(),
                executions.clone(),
                launcher.clone(),
            ),
            definitions: DefinitionService::new(workflows, executions.clone()),
            executions,
            launcher,
        }
    }

    fn active(mut d: WorkflowDraft) -> WorkflowDraft {
        d.is_active = true;
        d
    }

    fn event(event_type: &str, event_id: &str) -> DomainEvent {
        DomainEvent {
            event_type: event_type.to_string(),
            payload: json!({"order_id": 1}),
            event_id: event_id.to_string(),
            tenant_id: Some("acme".to_string()),
        }
    }

    fn webhook_draft(required: Value) -> WorkflowDraft {
        active(draft(
            "Hook",
            TriggerType::Webhook,
            vec![Node::new("in", "trigger").with_config("required_fields", required)],
            vec![],
        ))
    }

    #[test]
    fn idempotency_key_is_stable_hex() {
        let id = Uuid::now_v7();
        let key = idempotency_key("evt-1", &id);
        assert_eq!(key.len(), 64);
        assert_eq!(key, idempotency_key("evt-1", &id));
        assert_ne!(key, idempotency_key("evt-2", &id));
        assert_ne!(key, idempotency_key("evt-1", &Uuid::now_v7()));
    }

    #[tokio::test]
    async fn same_event_twice_yields_one_run() {
        let h = harness();
        let def = h
            .definitions
            .create(active(linear_draft("Orders", TriggerType::OrderPlaced)))
            .await
            .unwrap();

        let first = h.dispatcher.dispatch(&event("order_placed", "evt-1")).await.unwrap();
        let second = h.dispatcher.dispatch(&event("order_placed", "evt-1")).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(first[0].workflow_id, def.id);
        assert_eq!(first[0].pinned_version, 1);
        assert_eq!(h.executions.list_runs(&def.id, 10).await.unwrap().len(), 1);
        assert_eq!(h.launcher.count(), 1);
    }

    #[tokio::test]
    async fn only_active_definitions_of_the_type_match() {
        let h = harness();
        let orders = h
            .definitions
            .create(active(linear_draft("Orders", TriggerType::OrderPlaced)))
            .await
            .unwrap();
        h.definitions
            .create(linear_draft("Paused", TriggerType::OrderPlaced))
            .await
            .unwrap();
        h.definitions
            .create(active(linear_draft("Leads", TriggerType::LeadCreated)))
            .await
            .unwrap();

        let created = h
            .dispatcher
            .dispatch(&event("trigger_order_placed", "evt-9"))
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].workflow_id, orders.id);
        assert_eq!(created[0].trigger_type, TriggerType::OrderPlaced);
        assert!(created[0].idempotency_key.is_some());

        let run = h.executions.get_run(&created[0].run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.event_id.as_deref(), Some("evt-9"));
        assert_eq!(run.trigger_payload, json!({"order_id": 1}));
    }

    #[tokio::test]
    async fn one_event_fans_out_to_every_match() {
        let h = harness();
        for name in ["A", "B"] {
            h.definitions
                .create(active(linear_draft(name, TriggerType::LeadCreated)))
                .await
                .unwrap();
        }
        let created = h.dispatcher.dispatch(&event("lead_created", "evt-2")).await.unwrap();
        assert_eq!(created.len(), 2);
        assert_ne!(created[0].idempotency_key, created[1].idempotency_key);
    }

    #[tokio::test]
    async fn rejects_unroutable_events() {
        let h = harness();
        assert!(matches!(
            h.dispatcher.dispatch(&event("invoice_paid", "e")).await,
            Err(DispatchError::UnknownEventType(_))
        ));
        assert!(matches!(
            h.dispatcher.dispatch(&event("manual", "e")).await,
            Err(DispatchError::UnroutableTrigger(TriggerType::Manual))
        ));
        assert!(matches!(
            h.dispatcher.dispatch(&event("order_placed", "  ")).await,
            Err(DispatchError::MissingEventId)
        ));
    }

    #[tokio::test]
    async fn webhook_missing_required_field_creates_no_run() {
        let h = harness();
        let def = h
            .definitions
            .create(webhook_draft(json!(["email", "amount"])))
            .await
            .unwrap();

        let err = h
            .dispatcher
            .dispatch_webhook(&def.id, "d-1", json!({"email": "a@b.test", "amount": null}))
            .await
            .unwrap_err();
        match err {
            DispatchError::MalformedPayload { reason, .. } => assert!(reason.contains("amount")),
            other => panic!("expected malformed payload, got {other:?}"),
        }

        let err = h
            .dispatcher
            .dispatch_webhook(&def.id, "d-2", json!([1, 2]))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MalformedPayload { .. }));
        assert!(h.executions.list_runs(&def.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_delivery_is_deduplicated() {
        let h = harness();
        let def = h.definitions.create(webhook_draft(json!(["email"]))).await.unwrap();
        let payload = json!({"email": "a@b.test"});

        let first = h
            .dispatcher
            .dispatch_webhook(&def.id, "d-1", payload.clone())
            .await
            .unwrap();
        let again = h
            .dispatcher
            .dispatch_webhook(&def.id, "d-1", payload)
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn webhook_checks_trigger_and_activation() {
        let h = harness();
        let orders = h
            .definitions
            .create(active(linear_draft("Orders", TriggerType::OrderPlaced)))
            .await
            .unwrap();
        assert!(matches!(
            h.dispatcher.dispatch_webhook(&orders.id, "d", json!({})).await,
            Err(DispatchError::TriggerMismatch { .. })
        ));

        let mut inactive = webhook_draft(json!([]));
        inactive.is_active = false;
        let hook = h.definitions.create(inactive).await.unwrap();
        assert!(matches!(
            h.dispatcher.dispatch_webhook(&hook.id, "d", json!({})).await,
            Err(DispatchError::Inactive(_))
        ));

        assert!(matches!(
            h.dispatcher.dispatch_webhook(&Uuid::now_v7(), "d", json!({})).await,
            Err(DispatchError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn manual_runs_bypass_activation_and_dedup() {
        let h = harness();
        let def = h
            .definitions
            .create(linear_draft("Paused", TriggerType::OrderPlaced))
            .await
            .unwrap();
        assert!(!def.is_active);

        let a = h.dispatcher.run_manual(&def.id, json!({})).await.unwrap();
        let b = h.dispatcher.run_manual(&def.id, json!({})).await.unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.trigger_type, TriggerType::Manual);
        assert!(a.idempotency_key.is_none());
        assert_eq!(h.launcher.count(), 2);
    }

    #[tokio::test]
    async fn schedule_ticks_are_idempotent() {
        let h = harness();
        let def = h
            .definitions
            .create(active(draft(
                "Nightly",
                TriggerType::Schedule,
                vec![Node::new("tick", "trigger").with_config("schedule", json!("daily"))],
                vec![],
            )))
            .await
            .unwrap();
        let tick = "2026-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();

        let first = h.dispatcher.dispatch_schedule_tick(&def, tick).await.unwrap();
        let second = h.dispatcher.dispatch_schedule_tick(&def, tick).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let run = h
            .executions
            .get_run(&first.unwrap().run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            run.event_id.as_deref(),
            Some(format!("schedule:{}:2026-03-01T00:00:00Z", def.id).as_str())
        );
    }

    #[test]
    fn signing_secret_read_from_trigger_node() {
        let mut def = crate::workflow::fixtures::definition(
            vec![Node::new("in", "trigger").with_config("signing_secret", json!("s3cret"))],
            vec![],
        );
        assert_eq!(signing_secret(&def), Some("s3cret"));
        def.nodes[0].config.clear();
        assert_eq!(signing_secret(&def), None);
    }
}
