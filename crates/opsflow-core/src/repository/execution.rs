//! Execution store trait.
//!
//! Durable, append-only record of runs and node results. Run status moves
//! forward only: once a run is terminal, further status changes are
//! rejected with `RepositoryError::Conflict`.

use chrono::{DateTime, Utc};
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::{ExecutionRun, NodeResult, RunStatus};
use opsflow_types::workflow::WorkflowStats;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Repository trait for runs and node results.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a run unless another run already holds its idempotency key.
    ///
    /// Returns `true` if the run was inserted. Runs without a key are always
    /// inserted. The check-and-insert is atomic.
    fn create_run_if_absent(
        &self,
        run: &ExecutionRun,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRun>, RepositoryError>> + Send;

    /// List runs for a workflow, newest first.
    fn list_runs(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRun>, RepositoryError>> + Send;

    /// List runs currently in `status`, oldest first.
    fn list_runs_by_status(
        &self,
        status: RunStatus,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRun>, RepositoryError>> + Send;

    /// Compare-and-swap the status. Returns `false` if the run was not in
    /// `from`. Entering `Running` stamps `started_at` once and clears any
    /// suspension marker.
    fn transition_status(
        &self,
        run_id: &Uuid,
        from: RunStatus,
        to: RunStatus,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Set the status of a non-terminal run. Terminal statuses stamp
    /// `finished_at`.
    fn set_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist the accumulated node outputs.
    fn save_context(
        &self,
        run_id: &Uuid,
        context: &Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Park a running run on `node_id` until `resume_at`.
    fn suspend_run(
        &self,
        run_id: &Uuid,
        node_id: &str,
        resume_at: DateTime<Utc>,
        context: &Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Suspended runs whose `resume_at` is at or before `now`.
    fn due_suspended(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRun>, RepositoryError>> + Send;

    /// Abort every non-terminal run of a workflow. Returns the number aborted.
    fn abort_active(
        &self,
        workflow_id: &Uuid,
        reason: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Node results
    // -----------------------------------------------------------------------

    fn append_node_result(
        &self,
        result: &NodeResult,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Node results of a run in the order they were recorded.
    fn node_results(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<NodeResult>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// Stats derived from the workflow's terminal runs.
    fn stats_for(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<WorkflowStats, RepositoryError>> + Send;
}
