//! Per-run context: node outputs and template resolution.
//!
//! The context is the accumulating map `node id -> output`. A node only ever
//! sees the outputs of its ancestors in the pinned graph, never those of
//! siblings or other branches, even when they already ran.

use serde_json::{Map, Value, json};

use super::plan::ExecutionPlan;

/// Data a node may read: the trigger payload plus ancestor outputs.
#[derive(Debug, Clone, Default)]
pub struct NodeScope {
    pub trigger: Value,
    pub nodes: Map<String, Value>,
}

impl NodeScope {
    /// Build the scope for `node_id` from the run's full context.
    pub fn for_node(
        plan: &ExecutionPlan,
        node_id: &str,
        trigger: &Value,
        context: &Map<String, Value>,
    ) -> Self {
        let nodes = context
            .iter()
            .filter(|(id, _)| plan.is_ancestor(id, node_id))
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect();
        Self {
            trigger: trigger.clone(),
            nodes,
        }
    }

    /// The JSON object expressions evaluate against:
    /// `{"trigger": ..., "nodes": {"<id>": <output>, ...}}`.
    pub fn to_expression_context(&self) -> Value {
        json!({
            "trigger": self.trigger,
            "nodes": self.nodes,
        })
    }

    /// Look up a dotted path such as `trigger.customer.email` or
    /// `nodes.lookup.items.0.sku`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = match segments.next()? {
            "trigger" => &self.trigger,
            "nodes" => {
                let id = segments.next()?;
                self.nodes.get(id)?
            }
            _ => return None,
        };
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve `{{ path }}` templates in every string inside `value`.
    ///
    /// A string that is exactly one template takes the referenced value with
    /// its JSON type intact. Templates embedded in longer strings are
    /// stringified. Unresolvable references are left untouched.
    pub fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve templates in a string, always producing a string.
    pub fn resolve_string(&self, template: &str) -> String {
        match self.resolve_str(template) {
            Value::String(s) => s,
            other => value_to_string(&other),
        }
    }

    fn resolve_str(&self, template: &str) -> Value {
        let trimmed = template.trim();
        if let Some(inner) = whole_template(trimmed) {
            return match self.lookup(inner) {
                Some(v) => v.clone(),
                None => Value::String(template.to_string()),
            };
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let end = start + len + 2;
            let path = rest[start + 2..end - 2].trim();
            out.push_str(&rest[..start]);
            match self.lookup(path) {
                Some(v) => out.push_str(&value_to_string(v)),
                None => out.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }
        out.push_str(rest);
        Value::String(out)
    }
}

/// `{{ path }}` with nothing around it, returning `path`.
fn whole_template(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Convert a JSON value to a plain string for interpolation. Strings are
/// inserted without quotes.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
