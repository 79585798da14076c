//! JEXL expression evaluator for `condition` nodes.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of string and collection
//! transforms. Payload data is always passed as the evaluation context and
//! never spliced into the expression text.

use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with the standard transforms registered.
///
/// Expressions see `trigger.<field>` and `nodes.<id>.<field>`, e.g.
/// `trigger.total > 100 && nodes.lookup.tier|lower == 'gold'`.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

fn str_arg(args: &[Value], idx: usize) -> &str {
    args.get(idx).and_then(Value::as_str).unwrap_or("")
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
            .with_transform("contains", |args: &[Value]| {
                let found = match args.first() {
                    Some(Value::Array(items)) => {
                        items.iter().any(|v| Some(v) == args.get(1))
                    }
                    _ => str_arg(args, 0).contains(str_arg(args, 1)),
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!value_to_bool(&val)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate to a boolean using JavaScript-like truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Ok(value_to_bool(&result))
    }

    /// Evaluate and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Value {
        json!({
            "trigger": {
                "order_id": 42,
                "total": 250.0,
                "customer": { "email": "Ops@Example.com", "tier": "gold" },
                "tags": ["priority", "b2b"]
            },
            "nodes": {
                "lookup": { "found": true, "name": "  Acme  " }
            }
        })
    }

    #[test]
    fn numeric_comparison() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate_bool("trigger.total > 100", &ctx()).unwrap());
        assert!(!eval.evaluate_bool("trigger.total > 1000", &ctx()).unwrap());
    }

    #[test]
    fn node_outputs_are_addressable() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate_bool("nodes.lookup.found", &ctx()).unwrap());
        assert_eq!(
            eval.evaluate_value("nodes.lookup.name|trim", &ctx()).unwrap(),
            json!("Acme")
        );
    }

    #[test]
    fn string_transforms() {
        let eval = ConditionEvaluator::new();
        assert!(
            eval.evaluate_bool("trigger.customer.email|lower|endsWith('@example.com')", &ctx())
                .unwrap()
        );
        assert!(
            eval.evaluate_bool("trigger.customer.tier|upper == 'GOLD'", &ctx())
                .unwrap()
        );
    }

    #[test]
    fn collection_transforms() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate_bool("trigger.tags|contains('b2b')", &ctx()).unwrap());
        assert!(eval.evaluate_bool("trigger.tags|length > 1", &ctx()).unwrap());
    }

    #[test]
    fn missing_field_is_falsy() {
        let eval = ConditionEvaluator::new();
        assert!(!eval.evaluate_bool("trigger.coupon", &ctx()).unwrap());
    }

    #[test]
    fn non_object_context_is_rejected() {
        let eval = ConditionEvaluator::new();
        assert!(matches!(
            eval.evaluate_bool("true", &json!([1, 2])),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn truthiness() {
        assert!(!value_to_bool(&json!(0)));
        assert!(value_to_bool(&json!("x")));
        assert!(!value_to_bool(&json!("")));
        assert!(value_to_bool(&json!({})));
        assert!(!value_to_bool(&Value::Null));
    }
}
