//! Node handler trait and type-keyed registry.
//!
//! The engine never matches on node types itself: it asks the registry for the
//! handler registered under `node.node_type`. New node types are added by
//! registering another handler at startup.
//!
//! `NodeHandler` uses RPITIT, so it cannot be a trait object directly. The
//! object-safe `NodeHandlerDyn` with a blanket impl bridges the gap:
//! 1. `NodeHandlerDyn` returns boxed futures
//! 2. every `T: NodeHandler` implements it automatically
//! 3. the registry stores `Arc<dyn NodeHandlerDyn>`

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opsflow_types::workflow::Node;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::context::NodeScope;

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

/// Everything a handler may read while executing one node.
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub node: Node,
    /// Trigger payload and ancestor outputs.
    pub scope: NodeScope,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl NodeInput {
    pub fn config(&self) -> &Map<String, Value> {
        &self.node.config
    }
}

/// What a successful handler invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Plain output, merged into the run context under the node id.
    Output(Value),
    /// Output plus the label of the outgoing edge to follow.
    Branch { label: String, output: Value },
    /// Park the run until `resume_at`.
    Suspend { resume_at: DateTime<Utc> },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Timeout raised by the engine around a node attempt or a whole run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("node '{node_id}' timed out after {secs}s")]
    Node { node_id: String, secs: u64 },

    #[error("run timed out after {secs}s")]
    Run { secs: u64 },
}

/// A node handler failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeExecutionError {
    /// Transient failure; the engine retries within the node's budget.
    #[error("{0}")]
    Retryable(String),

    /// Permanent failure; retrying would not help.
    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("no handler registered for node type '{0}'")]
    UnknownType(String),
}

impl NodeExecutionError {
    /// Timeouts count as failed attempts and are retried like transient errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeExecutionError::Retryable(_) | NodeExecutionError::Timeout(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Executes one node type.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait NodeHandler: Send + Sync {
    /// The `node.type` value this handler serves.
    fn node_type(&self) -> &str;

    /// Retry budget when the node config does not set `max_retries`.
    fn default_max_retries(&self) -> u32 {
        0
    }

    fn execute(
        &self,
        input: &NodeInput,
    ) -> impl Future<Output = Result<NodeOutcome, NodeExecutionError>> + Send;
}

/// Object-safe version of [`NodeHandler`] with boxed futures.
pub trait NodeHandlerDyn: Send + Sync {
    fn node_type_dyn(&self) -> &str;

    fn default_max_retries_dyn(&self) -> u32;

    fn execute_boxed<'a>(
        &'a self,
        input: &'a NodeInput,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome, NodeExecutionError>> + Send + 'a>>;
}

/// Blanket implementation: any `NodeHandler` automatically implements `NodeHandlerDyn`.
impl<T: NodeHandler> NodeHandlerDyn for T {
    fn node_type_dyn(&self) -> &str {
        self.node_type()
    }

    fn default_max_retries_dyn(&self) -> u32 {
        self.default_max_retries()
    }

    fn execute_boxed<'a>(
        &'a self,
        input: &'a NodeInput,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome, NodeExecutionError>> + Send + 'a>> {
        Box::pin(self.execute(input))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Type-keyed handler lookup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandlerDyn>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `trigger`, `action`, `condition` and
    /// `delay` handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(super::nodes::TriggerHandler);
        registry.register(super::nodes::ActionHandler);
        registry.register(super::nodes::ConditionHandler::new());
        registry.register(super::nodes::DelayHandler);
        registry
    }

    /// Register a handler under its `node_type`, replacing any previous one.
    pub fn register<H: NodeHandler + 'static>(&mut self, handler: H) {
        let key = handler.node_type().to_string();
        self.handlers.insert(key, Arc::new(handler));
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandlerDyn>> {
        self.handlers.get(node_type).cloned()
    }

    /// Registered node types, sorted.
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}
