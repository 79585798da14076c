//! Execution plan for a pinned workflow snapshot.
//!
//! Uses `petgraph` to order nodes topologically. The plan also answers the
//! two questions the engine asks while walking: which incoming edges of a
//! node are active, and which earlier nodes a node may see in its context.

use std::collections::{BTreeSet, HashMap, HashSet};

use opsflow_types::execution::NodeStatus;
use opsflow_types::workflow::{Edge, Node, WorkflowDefinition};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

/// Label followed when no outgoing edge matches a condition's result.
pub const DEFAULT_BRANCH: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("cycle detected involving node '{0}'")]
    Cycle(String),

    #[error("edge references unknown node '{0}'")]
    UnknownNode(String),
}

/// How a visited node ended, as seen by its outgoing edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub status: NodeStatus,
    /// Branch label emitted by a condition node.
    pub branch: Option<String>,
    /// The node is marked `continue_on_error`.
    pub continue_on_error: bool,
}

impl Visit {
    fn passes(&self) -> bool {
        match self.status {
            NodeStatus::Success => true,
            NodeStatus::Failed => self.continue_on_error,
            NodeStatus::Skipped => false,
        }
    }
}

/// Topologically ordered view of a workflow graph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    order: Vec<Node>,
    incoming: HashMap<String, Vec<Edge>>,
    outgoing: HashMap<String, Vec<Edge>>,
    ancestors: HashMap<String, HashSet<String>>,
    entries: HashSet<String>,
}

impl ExecutionPlan {
    /// Build a plan. Ties in the topological order are broken by the order
    /// nodes appear in the definition.
    pub fn build(def: &WorkflowDefinition) -> Result<Self, PlanError> {
        let index_of: HashMap<&str, usize> = def
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut graph = DiGraph::<usize, ()>::new();
        let graph_idx: Vec<_> = (0..def.nodes.len()).map(|i| graph.add_node(i)).collect();

        let mut incoming: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut outgoing: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut in_degree = vec![0usize; def.nodes.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); def.nodes.len()];
        for edge in &def.edges {
            let from = *index_of
                .get(edge.from_node.as_str())
                .ok_or_else(|| PlanError::UnknownNode(edge.from_node.clone()))?;
            let to = *index_of
                .get(edge.to_node.as_str())
                .ok_or_else(|| PlanError::UnknownNode(edge.to_node.clone()))?;
            graph.add_edge(graph_idx[from], graph_idx[to], ());
            in_degree[to] += 1;
            children[from].push(to);
            incoming
                .entry(edge.to_node.clone())
                .or_default()
                .push(edge.clone());
            outgoing
                .entry(edge.from_node.clone())
                .or_default()
                .push(edge.clone());
        }

        // Topological sort -- detects cycles
        toposort(&graph, None).map_err(|cycle| {
            let idx = graph[cycle.node_id()];
            PlanError::Cycle(def.nodes[idx].id.clone())
        })?;

        // Kahn's algorithm with the lowest declaration index first, so the
        // walk order is stable across loads of the same snapshot.
        let mut ready: BTreeSet<usize> = (0..def.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(def.nodes.len());
        while let Some(i) = ready.pop_first() {
            order.push(def.nodes[i].clone());
            for &child in &children[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        // Ancestor sets in topological order: each node inherits its parents'.
        let mut ancestors: HashMap<String, HashSet<String>> = HashMap::new();
        for node in &order {
            let mut set = HashSet::new();
            for edge in incoming.get(&node.id).map(Vec::as_slice).unwrap_or(&[]) {
                set.insert(edge.from_node.clone());
                if let Some(parent) = ancestors.get(&edge.from_node) {
                    set.extend(parent.iter().cloned());
                }
            }
            ancestors.insert(node.id.clone(), set);
        }

        let entries = def
            .nodes
            .iter()
            .filter(|n| !incoming.contains_key(&n.id))
            .map(|n| n.id.clone())
            .collect();

        Ok(Self {
            order,
            incoming,
            outgoing,
            ancestors,
            entries,
        })
    }

    /// Nodes in execution order.
    pub fn order(&self) -> &[Node] {
        &self.order
    }

    pub fn incoming(&self, node_id: &str) -> &[Edge] {
        self.incoming.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outgoing(&self, node_id: &str) -> &[Edge] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_ancestor(&self, ancestor: &str, of: &str) -> bool {
        self.ancestors
            .get(of)
            .is_some_and(|set| set.contains(ancestor))
    }

    /// Entry nodes have no incoming edges, whatever their type.
    pub fn is_entry(&self, node_id: &str) -> bool {
        self.entries.contains(node_id)
    }

    /// Whether `edge` carries control, given the visit of its source.
    ///
    /// A source that emitted a branch activates the edge with that label; if
    /// none of its outgoing edges carries the label, the `default` edge
    /// instead. A source without a branch activates only unlabeled edges.
    pub fn edge_active(&self, edge: &Edge, source: &Visit) -> bool {
        if !source.passes() {
            return false;
        }
        match (&source.branch, edge.branch_label.as_deref()) {
            (Some(branch), Some(label)) => {
                if label == branch {
                    return true;
                }
                label == DEFAULT_BRANCH
                    && !self
                        .outgoing(&edge.from_node)
                        .iter()
                        .any(|e| e.branch_label.as_deref() == Some(branch.as_str()))
            }
            (Some(_), None) => false,
            (None, Some(_)) => false,
            (None, None) => true,
        }
    }

    /// Whether a node should execute: an entry node, or at least one
    /// incoming edge is active.
    pub fn should_run(&self, node_id: &str, visits: &HashMap<String, Visit>) -> bool {
        if self.is_entry(node_id) {
            return true;
        }
        self.incoming(node_id).iter().any(|edge| {
            visits
                .get(&edge.from_node)
                .is_some_and(|visit| self.edge_active(edge, visit))
        })
    }
}
