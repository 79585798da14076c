//! Shared test fixtures for the workflow modules.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use opsflow_types::workflow::{Edge, Node, TriggerType, WorkflowDefinition, WorkflowDraft};
use serde_json::{Value, json};
use uuid::Uuid;

use super::handler::{NodeExecutionError, NodeHandler, NodeInput, NodeOutcome};

/// A stored-looking definition at version 1.
pub fn definition(nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowDefinition {
    let now = Utc::now();
    WorkflowDefinition {
        id: Uuid::now_v7(),
        name: "Fixture".to_string(),
        description: None,
        trigger_type: TriggerType::OrderPlaced,
        nodes,
        edges,
        is_active: true,
        version: 1,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

pub fn draft(
    name: &str,
    trigger_type: TriggerType,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
) -> WorkflowDraft {
    WorkflowDraft {
        name: name.to_string(),
        description: None,
        trigger_type,
        nodes,
        edges,
        is_active: false,
    }
}

/// trigger -> action, the smallest useful graph.
pub fn linear_draft(name: &str, trigger_type: TriggerType) -> WorkflowDraft {
    draft(
        name,
        trigger_type,
        vec![
            Node::new("start", "trigger"),
            Node::new("notify", "action")
                .with_config("action", json!("send_email"))
                .with_config("params", json!({"order": "{{ trigger.order_id }}"})),
        ],
        vec![Edge::new("start", "notify")],
    )
}

/// trigger -> condition(total > 100) -> true: `vip`, false: `standard`.
pub fn branching_draft() -> WorkflowDraft {
    draft(
        "Branching",
        TriggerType::OrderPlaced,
        vec![
            Node::new("start", "trigger"),
            Node::new("check", "condition").with_config("expression", json!("trigger.total > 100")),
            Node::new("vip", "action").with_config("action", json!("tag_vip")),
            Node::new("standard", "action").with_config("action", json!("tag_standard")),
        ],
        vec![
            Edge::new("start", "check"),
            Edge::labeled("check", "vip", "true"),
            Edge::labeled("check", "standard", "false"),
        ],
    )
}

/// Handler that always fails with a retryable error and counts attempts.
#[derive(Clone, Default)]
pub struct FlakyHandler {
    pub attempts: Arc<AtomicU32>,
    /// Succeed from this attempt on; 0 = never.
    pub succeed_on: u32,
}

impl FlakyHandler {
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NodeHandler for FlakyHandler {
    fn node_type(&self) -> &str {
        "flaky"
    }

    async fn execute(&self, input: &NodeInput) -> Result<NodeOutcome, NodeExecutionError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.succeed_on != 0 && n >= self.succeed_on {
            return Ok(NodeOutcome::Output(json!({ "attempt": input.attempt })));
        }
        Err(NodeExecutionError::Retryable(format!("attempt {n} failed")))
    }
}

/// Handler that records how many times it ran.
#[derive(Clone, Default)]
pub struct CountingHandler {
    pub calls: Arc<AtomicU32>,
}

impl CountingHandler {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NodeHandler for CountingHandler {
    fn node_type(&self) -> &str {
        "counting"
    }

    async fn execute(&self, input: &NodeInput) -> Result<NodeOutcome, NodeExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let seen: Vec<Value> = input.scope.nodes.keys().map(|k| json!(k)).collect();
        Ok(NodeOutcome::Output(json!({ "seen": seen })))
    }
}

/// Handler that sleeps, for timeout and abort tests.
pub struct SlowHandler {
    pub millis: u64,
}

impl NodeHandler for SlowHandler {
    fn node_type(&self) -> &str {
        "slow"
    }

    async fn execute(&self, _input: &NodeInput) -> Result<NodeOutcome, NodeExecutionError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.millis)).await;
        Ok(NodeOutcome::Output(json!({ "slept_ms": self.millis })))
    }
}
