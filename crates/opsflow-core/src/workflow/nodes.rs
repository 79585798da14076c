//! Built-in node handlers.
//!
//! | type        | output                                        | retries |
//! |-------------|-----------------------------------------------|---------|
//! | `trigger`   | the trigger payload                           | 0       |
//! | `action`    | `{"action", "params"}` with templates resolved | 2       |
//! | `condition` | `{"branch", "result"}`, label `true`/`false`  | 0       |
//! | `delay`     | suspends for `seconds + minutes + hours`      | 0       |
//!
//! `action` stands in for the console's concrete actions (email, CRM update,
//! ...), which register their own handlers under their own types.

use chrono::{Duration, Utc};
use serde_json::{Value, json};

use super::expression::ConditionEvaluator;
use super::handler::{NodeExecutionError, NodeHandler, NodeInput, NodeOutcome};

// ---------------------------------------------------------------------------
// trigger
// ---------------------------------------------------------------------------

pub struct TriggerHandler;

impl NodeHandler for TriggerHandler {
    fn node_type(&self) -> &str {
        "trigger"
    }

    async fn execute(&self, input: &NodeInput) -> Result<NodeOutcome, NodeExecutionError> {
        Ok(NodeOutcome::Output(input.scope.trigger.clone()))
    }
}

// ---------------------------------------------------------------------------
// action
// ---------------------------------------------------------------------------

pub struct ActionHandler;

impl NodeHandler for ActionHandler {
    fn node_type(&self) -> &str {
        "action"
    }

    fn default_max_retries(&self) -> u32 {
        2
    }

    async fn execute(&self, input: &NodeInput) -> Result<NodeOutcome, NodeExecutionError> {
        let action = input.node.config_str("action").unwrap_or("noop");
        let params = input
            .config()
            .get("params")
            .map(|p| input.scope.resolve(p))
            .unwrap_or_else(|| json!({}));

        tracing::info!(
            run_id = %input.run_id,
            node_id = %input.node.id,
            action,
            "action executed"
        );

        Ok(NodeOutcome::Output(json!({
            "action": action,
            "params": params,
        })))
    }
}

// ---------------------------------------------------------------------------
// condition
// ---------------------------------------------------------------------------

pub struct ConditionHandler {
    evaluator: ConditionEvaluator,
}

impl ConditionHandler {
    pub fn new() -> Self {
        Self {
            evaluator: ConditionEvaluator::new(),
        }
    }
}

impl Default for ConditionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeHandler for ConditionHandler {
    fn node_type(&self) -> &str {
        "condition"
    }

    async fn execute(&self, input: &NodeInput) -> Result<NodeOutcome, NodeExecutionError> {
        let expression = input.node.config_str("expression").ok_or_else(|| {
            NodeExecutionError::Fatal(format!(
                "condition node '{}' has no expression",
                input.node.id
            ))
        })?;

        let result = self
            .evaluator
            .evaluate_bool(expression, &input.scope.to_expression_context())
            .map_err(|e| NodeExecutionError::Fatal(e.to_string()))?;

        let label = if result { "true" } else { "false" };
        tracing::debug!(node_id = %input.node.id, expression, label, "condition evaluated");

        Ok(NodeOutcome::Branch {
            label: label.to_string(),
            output: json!({ "branch": label, "result": result }),
        })
    }
}

// ---------------------------------------------------------------------------
// delay
// ---------------------------------------------------------------------------

pub struct DelayHandler;

impl DelayHandler {
    fn duration_secs(input: &NodeInput) -> Result<i64, NodeExecutionError> {
        let mut total: i64 = 0;
        for (key, unit) in [("seconds", 1), ("minutes", 60), ("hours", 3600)] {
            match input.config().get(key) {
                None | Some(Value::Null) => {}
                Some(v) => {
                    let n = v.as_i64().filter(|n| *n >= 0).ok_or_else(|| {
                        NodeExecutionError::Fatal(format!(
                            "delay node '{}': '{key}' must be a non-negative integer",
                            input.node.id
                        ))
                    })?;
                    total = total.saturating_add(n.saturating_mul(unit));
                }
            }
        }
        Ok(total)
    }
}

impl NodeHandler for DelayHandler {
    fn node_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, input: &NodeInput) -> Result<NodeOutcome, NodeExecutionError> {
        let secs = Self::duration_secs(input)?;
        if secs == 0 {
            return Ok(NodeOutcome::Output(json!({ "delayed_secs": 0 })));
        }
        Ok(NodeOutcome::Suspend {
            resume_at: Utc::now() + Duration::seconds(secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::NodeScope;
    use opsflow_types::workflow::Node;
    use serde_json::Map;
    use uuid::Uuid;

    fn input(node: Node, trigger: Value) -> NodeInput {
        NodeInput {
            run_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            node,
            scope: NodeScope {
                trigger,
                nodes: Map::new(),
            },
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn trigger_outputs_payload() {
        let out = TriggerHandler
            .execute(&input(Node::new("t", "trigger"), json!({"order_id": 7})))
            .await
            .unwrap();
        assert_eq!(out, NodeOutcome::Output(json!({"order_id": 7})));
    }

    #[tokio::test]
    async fn action_resolves_param_templates() {
        let node = Node::new("a", "action")
            .with_config("action", json!("send_email"))
            .with_config("params", json!({"to": "{{ trigger.email }}"}));
        let out = ActionHandler
            .execute(&input(node, json!({"email": "c@d.test"})))
            .await
            .unwrap();
        assert_eq!(
            out,
            NodeOutcome::Output(json!({"action": "send_email", "params": {"to": "c@d.test"}}))
        );
    }

    #[tokio::test]
    async fn condition_branches_on_expression() {
        let node = Node::new("c", "condition").with_config("expression", json!("trigger.total > 100"));
        let handler = ConditionHandler::new();

        let out = handler
            .execute(&input(node.clone(), json!({"total": 150})))
            .await
            .unwrap();
        assert!(matches!(out, NodeOutcome::Branch { ref label, .. } if label == "true"));

        let out = handler
            .execute(&input(node, json!({"total": 50})))
            .await
            .unwrap();
        assert!(matches!(out, NodeOutcome::Branch { ref label, .. } if label == "false"));
    }

    #[tokio::test]
    async fn condition_without_expression_is_fatal() {
        let err = ConditionHandler::new()
            .execute(&input(Node::new("c", "condition"), json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeExecutionError::Fatal(_)));
    }

    #[tokio::test]
    async fn delay_suspends_for_summed_duration() {
        let node = Node::new("d", "delay")
            .with_config("minutes", json!(1))
            .with_config("seconds", json!(30));
        let before = Utc::now();
        let out = DelayHandler.execute(&input(node, json!({}))).await.unwrap();
        let NodeOutcome::Suspend { resume_at } = out else {
            panic!("expected suspend, got {out:?}");
        };
        let secs = (resume_at - before).num_seconds();
        assert!((89..=91).contains(&secs), "got {secs}");
    }

    #[tokio::test]
    async fn zero_delay_does_not_suspend() {
        let out = DelayHandler
            .execute(&input(Node::new("d", "delay"), json!({})))
            .await
            .unwrap();
        assert!(matches!(out, NodeOutcome::Output(_)));
    }

    #[tokio::test]
    async fn negative_delay_is_fatal() {
        let node = Node::new("d", "delay").with_config("hours", json!(-1));
        let err = DelayHandler.execute(&input(node, json!({}))).await.unwrap_err();
        assert!(matches!(err, NodeExecutionError::Fatal(_)));
    }
}
