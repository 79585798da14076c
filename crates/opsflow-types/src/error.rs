use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors from repository operations (used by trait definitions in opsflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

// ---------------------------------------------------------------------------
// Graph validation
// ---------------------------------------------------------------------------

/// One structural problem found in a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    EmptyName,
    EmptyGraph,
    EmptyNodeId,
    EmptyNodeType { node_id: String },
    DuplicateNodeId { node_id: String },
    DanglingEdge {
        from_node: String,
        to_node: String,
        missing: String,
    },
    Cycle { path: Vec<String> },
    Unreachable { node_id: String },
    UnlabeledBranch { from_node: String, to_node: String },
    DuplicateBranchLabel { node_id: String, label: String },
    UnexpectedBranchLabel {
        from_node: String,
        to_node: String,
        label: String,
    },
    EdgeIntoTrigger { from_node: String, to_node: String },
    MissingSchedule,
    InvalidSchedule { node_id: String, reason: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyName => write!(f, "workflow name is empty"),
            ValidationIssue::EmptyGraph => write!(f, "workflow has no nodes"),
            ValidationIssue::EmptyNodeId => write!(f, "a node has an empty id"),
            ValidationIssue::EmptyNodeType { node_id } => {
                write!(f, "node '{node_id}' has an empty type")
            }
            ValidationIssue::DuplicateNodeId { node_id } => {
                write!(f, "node id '{node_id}' is used more than once")
            }
            ValidationIssue::DanglingEdge {
                from_node,
                to_node,
                missing,
            } => write!(
                f,
                "edge {from_node} -> {to_node} references unknown node '{missing}'"
            ),
            ValidationIssue::Cycle { path } => write!(f, "cycle: {}", path.join(" -> ")),
            ValidationIssue::Unreachable { node_id } => {
                write!(f, "node '{node_id}' is not reachable from an entry node")
            }
            ValidationIssue::UnlabeledBranch { from_node, to_node } => write!(
                f,
                "edge {from_node} -> {to_node} leaves a condition node without a branch label"
            ),
            ValidationIssue::DuplicateBranchLabel { node_id, label } => write!(
                f,
                "condition node '{node_id}' has more than one '{label}' branch"
            ),
            ValidationIssue::UnexpectedBranchLabel {
                from_node,
                to_node,
                label,
            } => write!(
                f,
                "edge {from_node} -> {to_node} has branch label '{label}' but '{from_node}' is not a condition node"
            ),
            ValidationIssue::EdgeIntoTrigger { from_node, to_node } => write!(
                f,
                "edge {from_node} -> {to_node} points into trigger node '{to_node}'"
            ),
            ValidationIssue::MissingSchedule => {
                write!(f, "schedule workflow has no trigger node with a schedule")
            }
            ValidationIssue::InvalidSchedule { node_id, reason } => {
                write!(f, "node '{node_id}' has an invalid schedule: {reason}")
            }
        }
    }
}

/// A graph failed validation. Lists every issue found, never just the first.
#[derive(Debug, Clone, Error, Serialize)]
#[error("invalid workflow graph: {}", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// An update carried a stale version.
#[derive(Debug, Clone, Error)]
#[error("workflow {workflow_id} is at version {actual}, update expected version {expected}")]
pub struct ConcurrencyConflictError {
    pub workflow_id: Uuid,
    pub expected: u64,
    pub actual: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn validation_error_lists_every_issue() {
        let err = ValidationError {
            issues: vec![
                ValidationIssue::Cycle {
                    path: vec!["a".into(), "b".into(), "a".into()],
                },
                ValidationIssue::DanglingEdge {
                    from_node: "b".into(),
                    to_node: "x".into(),
                    missing: "x".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("cycle: a -> b -> a"));
        assert!(msg.contains("unknown node 'x'"));
    }

    #[test]
    fn validation_issue_serializes_with_kind() {
        let v = serde_json::to_value(ValidationIssue::Unreachable {
            node_id: "orphan".into(),
        })
        .unwrap();
        assert_eq!(v["kind"], "unreachable");
        assert_eq!(v["node_id"], "orphan");
    }
}
