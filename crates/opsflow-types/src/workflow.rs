//! Workflow definition types.
//!
//! A `WorkflowDefinition` is a directed node graph plus metadata. The graph
//! shape (nodes + edges) is what the visual builder edits, what the engine
//! walks, and what the import/export codec carries between consoles.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Trigger types
// ---------------------------------------------------------------------------

/// The kind of event that starts a workflow.
///
/// Serialized with the `trigger_` prefix used on the wire; the bare event
/// names are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    #[serde(rename = "trigger_lead_created", alias = "lead_created")]
    LeadCreated,
    #[serde(rename = "trigger_lead_updated", alias = "lead_updated")]
    LeadUpdated,
    #[serde(rename = "trigger_customer_created", alias = "customer_created")]
    CustomerCreated,
    #[serde(rename = "trigger_order_placed", alias = "order_placed")]
    OrderPlaced,
    #[serde(rename = "trigger_inquiry_received", alias = "inquiry_received")]
    InquiryReceived,
    #[serde(rename = "trigger_manual", alias = "manual")]
    Manual,
    #[serde(rename = "trigger_webhook", alias = "webhook")]
    Webhook,
    #[serde(rename = "trigger_schedule", alias = "schedule")]
    Schedule,
}

impl TriggerType {
    pub const ALL: [TriggerType; 8] = [
        TriggerType::LeadCreated,
        TriggerType::LeadUpdated,
        TriggerType::CustomerCreated,
        TriggerType::OrderPlaced,
        TriggerType::InquiryReceived,
        TriggerType::Manual,
        TriggerType::Webhook,
        TriggerType::Schedule,
    ];

    /// The bare event name (`order_placed`).
    pub fn event_name(&self) -> &'static str {
        match self {
            TriggerType::LeadCreated => "lead_created",
            TriggerType::LeadUpdated => "lead_updated",
            TriggerType::CustomerCreated => "customer_created",
            TriggerType::OrderPlaced => "order_placed",
            TriggerType::InquiryReceived => "inquiry_received",
            TriggerType::Manual => "manual",
            TriggerType::Webhook => "webhook",
            TriggerType::Schedule => "schedule",
        }
    }

    /// The wire value (`trigger_order_placed`).
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::LeadCreated => "trigger_lead_created",
            TriggerType::LeadUpdated => "trigger_lead_updated",
            TriggerType::CustomerCreated => "trigger_customer_created",
            TriggerType::OrderPlaced => "trigger_order_placed",
            TriggerType::InquiryReceived => "trigger_inquiry_received",
            TriggerType::Manual => "trigger_manual",
            TriggerType::Webhook => "trigger_webhook",
            TriggerType::Schedule => "trigger_schedule",
        }
    }

    /// Resolve an inbound event type, accepting both the bare and the
    /// prefixed spelling.
    pub fn from_event_type(s: &str) -> Option<Self> {
        let name = s.trim();
        let name = name.strip_prefix("trigger_").unwrap_or(name);
        Self::ALL.into_iter().find(|t| t.event_name() == name)
    }

    /// Whether events of this type arrive through the generic event intake.
    /// Manual, webhook and schedule triggers each have their own entry point.
    pub fn is_domain_event(&self) -> bool {
        !matches!(
            self,
            TriggerType::Manual | TriggerType::Webhook | TriggerType::Schedule
        )
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A single node in the workflow graph.
///
/// `node_type` is open: the engine resolves it against its handler registry
/// at execution time. `config` is opaque to everything but that handler,
/// except for the engine-level keys `max_retries`, `timeout_secs` and
/// `continue_on_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Canvas position, carried verbatim for the visual builder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<NodePosition>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            config: Map::new(),
            position: None,
        }
    }

    /// Builder-style config setter, handy in fixtures.
    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    pub fn config_bool(&self, key: &str) -> bool {
        self.config
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Failed results of this node do not halt the run.
    pub fn continue_on_error(&self) -> bool {
        self.config_bool("continue_on_error")
    }
}

/// Canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

/// A directed edge between two nodes.
///
/// `branch_label` is only meaningful when `from_node` is a condition node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from_node: String,
    pub to_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_label: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_node: from.into(),
            to_node: to.into(),
            branch_label: None,
        }
    }

    pub fn labeled(from: impl Into<String>, to: impl Into<String>, label: &str) -> Self {
        Self {
            from_node: from.into(),
            to_node: to.into(),
            branch_label: Some(label.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A stored workflow: graph plus metadata.
///
/// `version` increments on every graph edit. Runs pin the version they were
/// created against and always execute that snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on create.
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub is_active: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set by soft delete. Deleted definitions are hidden from reads and
    /// dispatch but their history is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The draft fields of this definition, for re-validation.
    pub fn to_draft(&self) -> WorkflowDraft {
        WorkflowDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            trigger_type: self.trigger_type,
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            is_active: self.is_active,
        }
    }
}

/// Client-supplied workflow content for create and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Only honored on create; use toggle to change an existing workflow.
    #[serde(default)]
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Derived statistics
// ---------------------------------------------------------------------------

/// Aggregates over a workflow's terminal runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

/// A definition together with its stats, as shown in list views.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    #[serde(flatten)]
    pub definition: WorkflowDefinition,
    pub stats: WorkflowStats,
}

// ---------------------------------------------------------------------------
// Transport document
// ---------------------------------------------------------------------------

/// Current transport document format version.
pub const DOCUMENT_VERSION: &str = "1.0";

/// Versioned import/export envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub version: String,
    pub workflow: DocumentWorkflow,
}

/// The portable part of a workflow: no ids, versions or activation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentWorkflow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl From<&WorkflowDefinition> for DocumentWorkflow {
    fn from(def: &WorkflowDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            trigger_type: def.trigger_type,
            nodes: def.nodes.clone(),
            edges: def.edges.clone(),
        }
    }
}
