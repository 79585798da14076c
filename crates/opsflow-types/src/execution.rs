//! Execution tracking types.
//!
//! An `ExecutionRun` is one walk of a pinned workflow snapshot. Each node the
//! engine visits leaves exactly one `NodeResult`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::workflow::{TriggerType, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// Parked on a delay node until `resume_at`.
    Suspended,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Suspended => "suspended",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "suspended" => Ok(RunStatus::Suspended),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "aborted" => Ok(RunStatus::Aborted),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

/// Outcome recorded for a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Success => "success",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(NodeStatus::Success),
            "failed" => Ok(NodeStatus::Failed),
            "skipped" => Ok(NodeStatus::Skipped),
            other => Err(format!("invalid node status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution Run
// ---------------------------------------------------------------------------

/// A single execution of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Definition version this run executes. Never changes after creation.
    pub pinned_version: u64,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    /// Source event id (domain event, webhook delivery or schedule tick).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Dedup key derived from `(event_id, workflow_id)`. Manual runs have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub trigger_payload: Value,
    /// Node id -> output for every node that produced one.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Node the run is parked on while suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRun {
    /// A fresh pending run pinned to the definition's current version.
    pub fn pending(def: &WorkflowDefinition, trigger_type: TriggerType, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: def.id,
            pinned_version: def.version,
            status: RunStatus::Pending,
            trigger_type,
            event_id: None,
            idempotency_key: None,
            trigger_payload: payload,
            context: Map::new(),
            suspended_node: None,
            resume_at: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_event(mut self, event_id: &str, idempotency_key: String) -> Self {
        self.event_id = Some(event_id.to_string());
        self.idempotency_key = Some(idempotency_key);
        self
    }
}

/// Result of visiting one node in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Handler invocations made, 0 for skipped nodes.
    pub attempt_count: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Dispatch contract
// ---------------------------------------------------------------------------

/// An inbound domain event from the surrounding console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// A run the dispatcher created and handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub pinned_version: u64,
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl From<&ExecutionRun> for ExecutionRequest {
    fn from(run: &ExecutionRun) -> Self {
        Self {
            run_id: run.id,
            workflow_id: run.workflow_id,
            pinned_version: run.pinned_version,
            trigger_type: run.trigger_type,
            idempotency_key: run.idempotency_key.clone(),
        }
    }
}

/// A run together with its node results, for inspection views.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: ExecutionRun,
    pub node_results: Vec<NodeResult>,
}
