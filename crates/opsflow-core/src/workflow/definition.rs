//! Definition Store service.
//!
//! Owns every write to `WorkflowDefinition`. Each create and update runs the
//! full graph validation first, so an invalid graph never reaches storage.

use std::sync::Arc;

use chrono::Utc;
use opsflow_types::error::{ConcurrencyConflictError, RepositoryError, ValidationError};
use opsflow_types::workflow::{WorkflowDefinition, WorkflowDraft, WorkflowStats, WorkflowSummary};
use uuid::Uuid;

use super::graph::validate_draft;
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

/// Reason recorded on runs aborted because their workflow was deleted.
pub const WORKFLOW_DELETED: &str = "workflow deleted";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("workflow not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflictError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// DefinitionService
// ---------------------------------------------------------------------------

/// Service for the workflow definition lifecycle.
///
/// Generic over the repository traits so opsflow-core never depends on
/// opsflow-infra.
pub struct DefinitionService<W: WorkflowRepository, E: ExecutionRepository> {
    workflows: Arc<W>,
    executions: Arc<E>,
}

impl<W: WorkflowRepository, E: ExecutionRepository> DefinitionService<W, E> {
    pub fn new(workflows: Arc<W>, executions: Arc<E>) -> Self {
        Self {
            workflows,
            executions,
        }
    }

    /// Validate and store a new definition at version 1.
    pub async fn create(&self, draft: WorkflowDraft) -> Result<WorkflowDefinition, DefinitionError> {
        validate_draft(&draft)?;

        let now = Utc::now();
        let def = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: draft.name.trim().to_string(),
            description: draft.description,
            trigger_type: draft.trigger_type,
            nodes: draft.nodes,
            edges: draft.edges,
            is_active: draft.is_active,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.workflows.insert_definition(&def).await?;

        tracing::info!(
            workflow_id = %def.id,
            name = %def.name,
            trigger_type = %def.trigger_type,
            "workflow created"
        );
        Ok(def)
    }

    pub async fn get(&self, id: &Uuid) -> Result<WorkflowDefinition, DefinitionError> {
        self.workflows
            .get_definition(id)
            .await?
            .ok_or(DefinitionError::NotFound(*id))
    }

    /// All live definitions with their stats, ordered by name.
    pub async fn list(&self) -> Result<Vec<WorkflowSummary>, DefinitionError> {
        let defs = self.workflows.list_definitions().await?;
        let mut summaries = Vec::with_capacity(defs.len());
        for definition in defs {
            let stats = self.executions.stats_for(&definition.id).await?;
            summaries.push(WorkflowSummary { definition, stats });
        }
        Ok(summaries)
    }

    pub async fn stats(&self, id: &Uuid) -> Result<WorkflowStats, DefinitionError> {
        self.get(id).await?;
        Ok(self.executions.stats_for(id).await?)
    }

    /// Replace the graph and metadata, bumping the version.
    ///
    /// `is_active` is left untouched; use [`Self::toggle_active`]. When
    /// `expected_version` is given it must match the stored version. The
    /// write itself is a compare-and-swap, so a concurrent update that wins
    /// the race also surfaces as a conflict. Runs already created keep
    /// executing their pinned version.
    pub async fn update(
        &self,
        id: &Uuid,
        draft: WorkflowDraft,
        expected_version: Option<u64>,
    ) -> Result<WorkflowDefinition, DefinitionError> {
        validate_draft(&draft)?;

        let current = self.get(id).await?;
        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(ConcurrencyConflictError {
                    workflow_id: *id,
                    expected,
                    actual: current.version,
                }
                .into());
            }
        }

        let updated = WorkflowDefinition {
            name: draft.name.trim().to_string(),
            description: draft.description,
            trigger_type: draft.trigger_type,
            nodes: draft.nodes,
            edges: draft.edges,
            version: current.version + 1,
            updated_at: Utc::now(),
            ..current.clone()
        };

        let swapped = self
            .workflows
            .update_definition(&updated, current.version)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => DefinitionError::NotFound(*id),
                other => other.into(),
            })?;
        if !swapped {
            let actual = self
                .workflows
                .get_definition(id)
                .await?
                .map(|d| d.version)
                .unwrap_or(current.version);
            return Err(ConcurrencyConflictError {
                workflow_id: *id,
                expected: expected_version.unwrap_or(current.version),
                actual,
            }
            .into());
        }

        tracing::info!(workflow_id = %id, version = updated.version, "workflow updated");
        Ok(updated)
    }

    /// Flip `is_active`; returns the new value.
    pub async fn toggle_active(&self, id: &Uuid) -> Result<bool, DefinitionError> {
        let active = self.workflows.toggle_active(id).await.map_err(|e| match e {
            RepositoryError::NotFound => DefinitionError::NotFound(*id),
            other => other.into(),
        })?;
        tracing::info!(workflow_id = %id, is_active = active, "workflow toggled");
        Ok(active)
    }

    /// Copy a definition under a new id: version 1, inactive, no history.
    pub async fn duplicate(&self, id: &Uuid) -> Result<WorkflowDefinition, DefinitionError> {
        let source = self.get(id).await?;
        let now = Utc::now();
        let copy = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: format!("{} (copy)", source.name),
            is_active: false,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            ..source
        };
        self.workflows.insert_definition(&copy).await?;

        tracing::info!(source_id = %id, workflow_id = %copy.id, "workflow duplicated");
        Ok(copy)
    }

    /// Soft delete. Non-terminal runs of the workflow are aborted; history
    /// and version snapshots are kept.
    pub async fn delete(&self, id: &Uuid) -> Result<(), DefinitionError> {
        if !self.workflows.soft_delete(id, Utc::now()).await? {
            return Err(DefinitionError::NotFound(*id));
        }
        let aborted = self.executions.abort_active(id, WORKFLOW_DELETED).await?;
        tracing::info!(workflow_id = %id, aborted_runs = aborted, "workflow deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{InMemoryExecutionRepository, InMemoryWorkflowRepository};
    use crate::workflow::fixtures::{branching_draft, draft, linear_draft};
    use opsflow_types::error::ValidationIssue;
    use opsflow_types::execution::{ExecutionRun, RunStatus};
    use opsflow_types::workflow::{Edge, Node, TriggerType};
    use serde_json::json;

    type Service = DefinitionService<InMemoryWorkflowRepository, InMemoryExecutionRepository>;

    fn service() -> (Service, Arc<InMemoryExecutionRepository>) {
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let svc = DefinitionService::new(
            Arc::new(InMemoryWorkflowRepository::new()),
            executions.clone(),
        );
        (svc, executions)
    }

    #[tokio::test]
    async fn create_assigns_version_one() {
        let (svc, _) = service();
        let def = svc.create(branching_draft()).await.unwrap();
        assert_eq!(def.version, 1);
        assert!(!def.is_active);
        assert_eq!(svc.get(&def.id).await.unwrap().nodes.len(), 4);
    }

    #[tokio::test]
    async fn invalid_graph_is_never_written() {
        let (svc, _) = service();
        let bad = draft(
            "Loop",
            TriggerType::Manual,
            vec![Node::new("a", "trigger"), Node::new("b", "action")],
            vec![Edge::new("a", "b"), Edge::new("b", "b"), Edge::new("b", "zzz")],
        );
        let err = svc.create(bad).await.unwrap_err();
        let DefinitionError::Validation(v) = err else {
            panic!("expected validation error");
        };
        assert!(v.issues.iter().any(|i| matches!(i, ValidationIssue::Cycle { .. })));
        assert!(
            v.issues
                .iter()
                .any(|i| matches!(i, ValidationIssue::DanglingEdge { .. }))
        );
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_bumps_version_and_rejects_invalid() {
        let (svc, _) = service();
        let def = svc.create(linear_draft("Orders", TriggerType::OrderPlaced)).await.unwrap();

        let mut next = linear_draft("Orders v2", TriggerType::OrderPlaced);
        next.nodes.push(Node::new("audit", "action"));
        next.edges.push(Edge::new("notify", "audit"));
        let updated = svc.update(&def.id, next, None).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "Orders v2");
        assert_eq!(updated.created_at, def.created_at);

        let mut cyclic = linear_draft("Orders", TriggerType::OrderPlaced);
        cyclic.edges.push(Edge::new("notify", "start"));
        cyclic.nodes.push(Node::new("orphan", "action"));
        cyclic.edges.push(Edge::new("orphan", "orphan"));
        assert!(matches!(
            svc.update(&def.id, cyclic, None).await,
            Err(DefinitionError::Validation(_))
        ));
        assert_eq!(svc.get(&def.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let (svc, _) = service();
        let def = svc.create(linear_draft("Orders", TriggerType::OrderPlaced)).await.unwrap();
        svc.update(&def.id, linear_draft("A", TriggerType::OrderPlaced), Some(1))
            .await
            .unwrap();

        let err = svc
            .update(&def.id, linear_draft("B", TriggerType::OrderPlaced), Some(1))
            .await
            .unwrap_err();
        match err {
            DefinitionError::Conflict(c) => {
                assert_eq!(c.expected, 1);
                assert_eq!(c.actual, 2);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_keeps_activation_state() {
        let (svc, _) = service();
        let def = svc.create(linear_draft("Orders", TriggerType::OrderPlaced)).await.unwrap();
        assert!(svc.toggle_active(&def.id).await.unwrap());

        let mut next = linear_draft("Orders", TriggerType::OrderPlaced);
        next.is_active = false;
        let updated = svc.update(&def.id, next, None).await.unwrap();
        assert!(updated.is_active);
    }

    #[tokio::test]
    async fn toggle_flips_and_reports() {
        let (svc, _) = service();
        let def = svc.create(linear_draft("Orders", TriggerType::OrderPlaced)).await.unwrap();
        assert!(svc.toggle_active(&def.id).await.unwrap());
        assert!(!svc.toggle_active(&def.id).await.unwrap());
        assert!(matches!(
            svc.toggle_active(&Uuid::now_v7()).await,
            Err(DefinitionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_copies_graph_only() {
        let (svc, executions) = service();
        let mut d = branching_draft();
        d.is_active = true;
        let source = svc.create(d).await.unwrap();
        svc.update(&source.id, branching_draft(), None).await.unwrap();

        let mut run = ExecutionRun::pending(&source, TriggerType::OrderPlaced, json!({}));
        run.status = RunStatus::Completed;
        executions.create_run_if_absent(&run).await.unwrap();

        let copy = svc.duplicate(&source.id).await.unwrap();
        assert_ne!(copy.id, source.id);
        assert_eq!(copy.version, 1);
        assert!(!copy.is_active);
        assert_eq!(copy.nodes, source.nodes);
        assert_eq!(copy.edges, source.edges);
        assert_eq!(copy.trigger_type, source.trigger_type);
        assert_eq!(svc.stats(&copy.id).await.unwrap(), WorkflowStats::default());
    }

    #[tokio::test]
    async fn delete_hides_definition_and_aborts_runs() {
        let (svc, executions) = service();
        let def = svc.create(linear_draft("Orders", TriggerType::OrderPlaced)).await.unwrap();
        let run = ExecutionRun::pending(&def, TriggerType::OrderPlaced, json!({}));
        executions.create_run_if_absent(&run).await.unwrap();

        svc.delete(&def.id).await.unwrap();

        assert!(matches!(svc.get(&def.id).await, Err(DefinitionError::NotFound(_))));
        let stored = executions.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Aborted);
        assert_eq!(stored.error.as_deref(), Some(WORKFLOW_DELETED));
        assert!(matches!(svc.delete(&def.id).await, Err(DefinitionError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_is_ordered_by_name_with_stats() {
        let (svc, _) = service();
        svc.create(linear_draft("Zeta", TriggerType::OrderPlaced)).await.unwrap();
        svc.create(linear_draft("Alpha", TriggerType::LeadCreated)).await.unwrap();
        let names: Vec<String> = svc
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.definition.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }
}
