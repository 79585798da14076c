//! Structural validation of workflow graphs.
//!
//! Runs on every create and update. All checks run in a single pass and every
//! issue is collected, so the caller sees the whole list at once instead of
//! fixing problems one round-trip at a time.

use std::collections::{HashMap, HashSet, VecDeque};

use opsflow_types::error::{ValidationError, ValidationIssue};
use opsflow_types::workflow::{Edge, Node, TriggerType, WorkflowDraft};

use super::schedule::parse_schedule;

/// Node type whose outgoing edges carry branch labels.
pub const CONDITION_NODE: &str = "condition";

/// Node type that starts a walk. Nothing may point into it.
pub const TRIGGER_NODE: &str = "trigger";

/// Validate a draft. Returns every issue found.
pub fn validate_draft(draft: &WorkflowDraft) -> Result<(), ValidationError> {
    let mut issues = Vec::new();

    if draft.name.trim().is_empty() {
        issues.push(ValidationIssue::EmptyName);
    }
    issues.extend(graph_issues(&draft.nodes, &draft.edges));
    if draft.trigger_type == TriggerType::Schedule {
        issues.extend(schedule_issues(&draft.nodes));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}

/// Structural issues of a node graph, independent of workflow metadata.
pub fn graph_issues(nodes: &[Node], edges: &[Edge]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if nodes.is_empty() {
        issues.push(ValidationIssue::EmptyGraph);
        return issues;
    }

    // Node ids and types
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported_dupes: HashSet<&str> = HashSet::new();
    for node in nodes {
        if node.id.trim().is_empty() {
            issues.push(ValidationIssue::EmptyNodeId);
            continue;
        }
        if node.node_type.trim().is_empty() {
            issues.push(ValidationIssue::EmptyNodeType {
                node_id: node.id.clone(),
            });
        }
        if !seen.insert(node.id.as_str()) && reported_dupes.insert(node.id.as_str()) {
            issues.push(ValidationIssue::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    let types: HashMap<&str, &str> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.node_type.as_str()))
        .collect();

    // Dangling edges. Only edges with both ends present feed the later checks.
    let mut valid_edges: Vec<&Edge> = Vec::with_capacity(edges.len());
    for edge in edges {
        let mut dangling = false;
        for end in [&edge.from_node, &edge.to_node] {
            if !types.contains_key(end.as_str()) {
                issues.push(ValidationIssue::DanglingEdge {
                    from_node: edge.from_node.clone(),
                    to_node: edge.to_node.clone(),
                    missing: end.clone(),
                });
                dangling = true;
            }
        }
        if !dangling {
            valid_edges.push(edge);
        }
    }

    issues.extend(branch_issues(&types, &valid_edges));

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &valid_edges {
        adjacency
            .entry(edge.from_node.as_str())
            .or_default()
            .push(edge.to_node.as_str());
    }

    issues.extend(cycle_issues(nodes, &adjacency));
    issues.extend(reachability_issues(nodes, &valid_edges, &adjacency));

    issues
}

// ---------------------------------------------------------------------------
// Branch labels
// ---------------------------------------------------------------------------

fn branch_issues(types: &HashMap<&str, &str>, edges: &[&Edge]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut labels_by_node: HashMap<&str, HashSet<&str>> = HashMap::new();

    for edge in edges {
        if types.get(edge.to_node.as_str()) == Some(&TRIGGER_NODE) {
            issues.push(ValidationIssue::EdgeIntoTrigger {
                from_node: edge.from_node.clone(),
                to_node: edge.to_node.clone(),
            });
        }

        let is_condition = types.get(edge.from_node.as_str()) == Some(&CONDITION_NODE);
        match (is_condition, edge.branch_label.as_deref()) {
            (true, None) | (true, Some("")) => issues.push(ValidationIssue::UnlabeledBranch {
                from_node: edge.from_node.clone(),
                to_node: edge.to_node.clone(),
            }),
            (true, Some(label)) => {
                let labels = labels_by_node.entry(edge.from_node.as_str()).or_default();
                if !labels.insert(label) {
                    issues.push(ValidationIssue::DuplicateBranchLabel {
                        node_id: edge.from_node.clone(),
                        label: label.to_string(),
                    });
                }
            }
            (false, Some(label)) => issues.push(ValidationIssue::UnexpectedBranchLabel {
                from_node: edge.from_node.clone(),
                to_node: edge.to_node.clone(),
                label: label.to_string(),
            }),
            (false, None) => {}
        }
    }

    issues
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// DFS with in-progress marking. Each back edge reports the cycle it closes.
fn cycle_issues(nodes: &[Node], adjacency: &HashMap<&str, Vec<&str>>) -> Vec<ValidationIssue> {
    let mut marks: HashMap<&str, Mark> = nodes
        .iter()
        .map(|n| (n.id.as_str(), Mark::Unvisited))
        .collect();
    let mut issues = Vec::new();

    for node in nodes {
        let start = node.id.as_str();
        if marks.get(start) != Some(&Mark::Unvisited) {
            continue;
        }

        // Iterative DFS: (node, index of next child to visit)
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        marks.insert(start, Mark::InProgress);

        while let Some((current, child_idx)) = stack.last().copied() {
            let children = adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]);
            if child_idx >= children.len() {
                marks.insert(current, Mark::Done);
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let child = children[child_idx];
            match marks.get(child).copied().unwrap_or(Mark::Done) {
                Mark::Unvisited => {
                    marks.insert(child, Mark::InProgress);
                    stack.push((child, 0));
                }
                Mark::InProgress => {
                    let begin = stack.iter().position(|(id, _)| *id == child).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[begin..].iter().map(|(id, _)| id.to_string()).collect();
                    path.push(child.to_string());
                    issues.push(ValidationIssue::Cycle { path });
                }
                Mark::Done => {}
            }
        }
    }

    issues
}

// ---------------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------------

/// Entry nodes: nodes with no incoming edge.
pub fn entry_nodes<'a>(nodes: &'a [Node], edges: &[&Edge]) -> Vec<&'a str> {
    let targets: HashSet<&str> = edges.iter().map(|e| e.to_node.as_str()).collect();
    nodes
        .iter()
        .filter(|n| !targets.contains(n.id.as_str()))
        .map(|n| n.id.as_str())
        .collect()
}

fn reachability_issues(
    nodes: &[Node],
    edges: &[&Edge],
    adjacency: &HashMap<&str, Vec<&str>>,
) -> Vec<ValidationIssue> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = entry_nodes(nodes, edges).into_iter().collect();
    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        if let Some(children) = adjacency.get(id) {
            queue.extend(children.iter().copied());
        }
    }

    let mut reported = HashSet::new();
    nodes
        .iter()
        .filter(|n| !n.id.trim().is_empty())
        .filter(|n| !visited.contains(n.id.as_str()) && reported.insert(n.id.as_str()))
        .map(|n| ValidationIssue::Unreachable {
            node_id: n.id.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

fn schedule_issues(nodes: &[Node]) -> Vec<ValidationIssue> {
    let scheduled: Vec<(&Node, &str)> = nodes
        .iter()
        .filter(|n| n.node_type == TRIGGER_NODE)
        .filter_map(|n| n.config_str("schedule").map(|s| (n, s)))
        .collect();

    let Some((node, schedule)) = scheduled.first() else {
        return vec![ValidationIssue::MissingSchedule];
    };

    match parse_schedule(schedule) {
        Ok(_) => vec![],
        Err(e) => vec![ValidationIssue::InvalidSchedule {
            node_id: node.id.clone(),
            reason: e.to_string(),
        }],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
