//! In-memory repositories for testing and lightweight usage.
//!
//! Uses `BTreeMap` behind `tokio::sync::RwLock` for deterministic iteration.
//! Semantics mirror the SQLite implementations: soft delete, version
//! snapshots, idempotency-key dedup and forward-only run status.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::{ExecutionRun, NodeResult, RunStatus};
use opsflow_types::workflow::{TriggerType, WorkflowDefinition, WorkflowStats};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::execution::ExecutionRepository;
use super::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// In-memory implementation of [`WorkflowRepository`].
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    heads: Arc<RwLock<BTreeMap<Uuid, WorkflowDefinition>>>,
    versions: Arc<RwLock<BTreeMap<(Uuid, u64), WorkflowDefinition>>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn insert_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut heads = self.heads.write().await;
        if heads.contains_key(&def.id) {
            return Err(RepositoryError::Conflict(format!(
                "workflow {} already exists",
                def.id
            )));
        }
        heads.insert(def.id, def.clone());
        self.versions
            .write()
            .await
            .insert((def.id, def.version), def.clone());
        Ok(())
    }

    async fn update_definition(
        &self,
        def: &WorkflowDefinition,
        expected_version: u64,
    ) -> Result<bool, RepositoryError> {
        let mut heads = self.heads.write().await;
        let Some(current) = heads.get_mut(&def.id).filter(|d| !d.is_deleted()) else {
            return Err(RepositoryError::NotFound);
        };
        if current.version != expected_version {
            return Ok(false);
        }
        *current = def.clone();
        self.versions
            .write()
            .await
            .insert((def.id, def.version), def.clone());
        Ok(true)
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .heads
            .read()
            .await
            .get(id)
            .filter(|d| !d.is_deleted())
            .cloned())
    }

    async fn get_version(
        &self,
        id: &Uuid,
        version: u64,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.versions.read().await.get(&(*id, version)).cloned())
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<_> = self
            .heads
            .read()
            .await
            .values()
            .filter(|d| !d.is_deleted())
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    async fn list_active_by_trigger(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .list_definitions()
            .await?
            .into_iter()
            .filter(|d| d.is_active && d.trigger_type == trigger_type)
            .collect())
    }

    async fn toggle_active(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut heads = self.heads.write().await;
        let def = heads
            .get_mut(id)
            .filter(|d| !d.is_deleted())
            .ok_or(RepositoryError::NotFound)?;
        def.is_active = !def.is_active;
        def.updated_at = Utc::now();
        Ok(def.is_active)
    }

    async fn soft_delete(&self, id: &Uuid, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut heads = self.heads.write().await;
        match heads.get_mut(id).filter(|d| !d.is_deleted()) {
            Some(def) => {
                def.deleted_at = Some(at);
                def.is_active = false;
                def.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

/// In-memory implementation of [`ExecutionRepository`].
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    runs: Arc<RwLock<BTreeMap<Uuid, ExecutionRun>>>,
    keys: Arc<RwLock<HashSet<String>>>,
    results: Arc<RwLock<BTreeMap<Uuid, Vec<NodeResult>>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_not_terminal(run: &ExecutionRun) -> Result<(), RepositoryError> {
    if run.status.is_terminal() {
        return Err(RepositoryError::Conflict(format!(
            "run {} is already {}",
            run.id, run.status
        )));
    }
    Ok(())
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_run_if_absent(&self, run: &ExecutionRun) -> Result<bool, RepositoryError> {
        // Lock order: keys then runs, same as every other writer here.
        let mut keys = self.keys.write().await;
        if let Some(key) = &run.idempotency_key {
            if !keys.insert(key.clone()) {
                return Ok(false);
            }
        }
        self.runs.write().await.insert(run.id, run.clone());
        Ok(true)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<ExecutionRun>, RepositoryError> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn list_runs(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<ExecutionRun>, RepositoryError> {
        let runs = self.runs.read().await;
        // UUIDv7 keys sort by creation time.
        Ok(runs
            .values()
            .rev()
            .filter(|r| r.workflow_id == *workflow_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_runs_by_status(
        &self,
        status: RunStatus,
    ) -> Result<Vec<ExecutionRun>, RepositoryError> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        run_id: &Uuid,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<bool, RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        if run.status != from {
            return Ok(false);
        }
        run.status = to;
        if to == RunStatus::Running {
            run.started_at.get_or_insert_with(Utc::now);
            run.resume_at = None;
        }
        if to.is_terminal() {
            run.finished_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn set_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        ensure_not_terminal(run)?;
        run.status = status;
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        if status == RunStatus::Running {
            run.started_at.get_or_insert_with(Utc::now);
        }
        if status.is_terminal() {
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn save_context(
        &self,
        run_id: &Uuid,
        context: &Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.context = context.clone();
        Ok(())
    }

    async fn suspend_run(
        &self,
        run_id: &Uuid,
        node_id: &str,
        resume_at: DateTime<Utc>,
        context: &Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        ensure_not_terminal(run)?;
        run.status = RunStatus::Suspended;
        run.suspended_node = Some(node_id.to_string());
        run.resume_at = Some(resume_at);
        run.context = context.clone();
        Ok(())
    }

    async fn due_suspended(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRun>, RepositoryError> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.status == RunStatus::Suspended && r.resume_at.is_some_and(|t| t <= now))
            .cloned()
            .collect())
    }

    async fn abort_active(&self, workflow_id: &Uuid, reason: &str) -> Result<u64, RepositoryError> {
        let mut runs = self.runs.write().await;
        let now = Utc::now();
        let mut aborted = 0;
        for run in runs
            .values_mut()
            .filter(|r| r.workflow_id == *workflow_id && !r.status.is_terminal())
        {
            run.status = RunStatus::Aborted;
            run.error = Some(reason.to_string());
            run.finished_at = Some(now);
            aborted += 1;
        }
        Ok(aborted)
    }

    async fn append_node_result(&self, result: &NodeResult) -> Result<(), RepositoryError> {
        self.results
            .write()
            .await
            .entry(result.run_id)
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn node_results(&self, run_id: &Uuid) -> Result<Vec<NodeResult>, RepositoryError> {
        Ok(self
            .results
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn stats_for(&self, workflow_id: &Uuid) -> Result<WorkflowStats, RepositoryError> {
        let runs = self.runs.read().await;
        let mut stats = WorkflowStats::default();
        for run in runs
            .values()
            .filter(|r| r.workflow_id == *workflow_id && r.status.is_terminal())
        {
            stats.total_executions += 1;
            match run.status {
                RunStatus::Completed => stats.successful_executions += 1,
                RunStatus::Failed => stats.failed_executions += 1,
                _ => {}
            }
            if run.finished_at > stats.last_run {
                stats.last_run = run.finished_at;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_types::workflow::Node;
    use serde_json::json;

    fn sample_definition() -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "order-followup".to_string(),
            description: None,
            trigger_type: TriggerType::OrderPlaced,
            nodes: vec![Node::new("start", "trigger")],
            edges: vec![],
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn update_is_compare_and_swap() {
        let repo = InMemoryWorkflowRepository::new();
        let mut def = sample_definition();
        repo.insert_definition(&def).await.unwrap();

        def.version = 2;
        assert!(repo.update_definition(&def, 1).await.unwrap());
        def.version = 3;
        assert!(!repo.update_definition(&def, 1).await.unwrap());

        assert!(repo.get_version(&def.id, 1).await.unwrap().is_some());
        assert!(repo.get_version(&def.id, 2).await.unwrap().is_some());
        assert!(repo.get_version(&def.id, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn soft_deleted_definitions_are_hidden_but_snapshots_remain() {
        let repo = InMemoryWorkflowRepository::new();
        let def = sample_definition();
        repo.insert_definition(&def).await.unwrap();

        assert!(repo.soft_delete(&def.id, Utc::now()).await.unwrap());
        assert!(!repo.soft_delete(&def.id, Utc::now()).await.unwrap());
        assert!(repo.get_definition(&def.id).await.unwrap().is_none());
        assert!(repo.list_definitions().await.unwrap().is_empty());
        assert!(repo.get_version(&def.id, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn idempotency_key_dedups_runs() {
        let repo = InMemoryExecutionRepository::new();
        let def = sample_definition();
        let first = ExecutionRun::pending(&def, TriggerType::OrderPlaced, json!({}))
            .with_event("evt-1", "key-1".to_string());
        let second = ExecutionRun::pending(&def, TriggerType::OrderPlaced, json!({}))
            .with_event("evt-1", "key-1".to_string());

        assert!(repo.create_run_if_absent(&first).await.unwrap());
        assert!(!repo.create_run_if_absent(&second).await.unwrap());
        assert_eq!(repo.list_runs(&def.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_runs_reject_status_changes() {
        let repo = InMemoryExecutionRepository::new();
        let def = sample_definition();
        let run = ExecutionRun::pending(&def, TriggerType::Manual, json!({}));
        repo.create_run_if_absent(&run).await.unwrap();

        repo.set_status(&run.id, RunStatus::Completed, None).await.unwrap();
        let err = repo
            .set_status(&run.id, RunStatus::Failed, Some("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn stats_count_terminal_runs_only() {
        let repo = InMemoryExecutionRepository::new();
        let def = sample_definition();
        for status in [RunStatus::Completed, RunStatus::Failed, RunStatus::Running] {
            let run = ExecutionRun::pending(&def, TriggerType::Manual, json!({}));
            repo.create_run_if_absent(&run).await.unwrap();
            repo.set_status(&run.id, status, None).await.unwrap();
        }

        let stats = repo.stats_for(&def.id).await.unwrap();
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.failed_executions, 1);
        assert!(stats.last_run.is_some());
    }
}
