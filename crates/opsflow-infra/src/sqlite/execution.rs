//! SQLite execution repository implementation.
//!
//! Runs live in `execution_runs`, node results in `node_results`. The unique
//! index on `execution_runs.idempotency_key` is the dispatcher's shared dedup
//! table; status changes are guarded in SQL so a terminal run never moves.

use chrono::{DateTime, Utc};
use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::{ExecutionRun, NodeResult, NodeStatus, RunStatus};
use opsflow_types::workflow::{TriggerType, WorkflowStats};
use serde_json::{Map, Value};
use sqlx::Row;
use uuid::Uuid;

use super::convert::{
    format_datetime, from_json, from_str_enum, parse_datetime, parse_uuid, query_err, to_json,
};
use super::pool::DatabasePool;

const NOT_TERMINAL: &str = "status NOT IN ('completed', 'failed', 'aborted')";

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Explain why a guarded update touched no row.
    async fn guard_failure(&self, run_id: &Uuid) -> RepositoryError {
        let row: Result<Option<(String,)>, _> =
            sqlx::query_as("SELECT status FROM execution_runs WHERE id = ?")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool.writer)
                .await;
        match row {
            Ok(Some((status,))) => {
                RepositoryError::Conflict(format!("run {run_id} is already {status}"))
            }
            Ok(None) => RepositoryError::NotFound,
            Err(e) => query_err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    workflow_id: String,
    pinned_version: i64,
    status: String,
    trigger_type: String,
    event_id: Option<String>,
    idempotency_key: Option<String>,
    trigger_payload: String,
    context: String,
    suspended_node: Option<String>,
    resume_at: Option<String>,
    error: Option<String>,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            pinned_version: row.try_get("pinned_version")?,
            status: row.try_get("status")?,
            trigger_type: row.try_get("trigger_type")?,
            event_id: row.try_get("event_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            trigger_payload: row.try_get("trigger_payload")?,
            context: row.try_get("context")?,
            suspended_node: row.try_get("suspended_node")?,
            resume_at: row.try_get("resume_at")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_run(self) -> Result<ExecutionRun, RepositoryError> {
        let context: Map<String, Value> = from_json(&self.context, "context")?;
        Ok(ExecutionRun {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            pinned_version: self.pinned_version as u64,
            status: from_str_enum::<RunStatus>(&self.status, "run status")?,
            trigger_type: from_str_enum::<TriggerType>(&self.trigger_type, "trigger type")?,
            event_id: self.event_id,
            idempotency_key: self.idempotency_key,
            trigger_payload: from_json(&self.trigger_payload, "trigger payload")?,
            context,
            suspended_node: self.suspended_node,
            resume_at: self.resume_at.as_deref().map(parse_datetime).transpose()?,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn into_runs(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ExecutionRun>, RepositoryError> {
    let mut runs = Vec::with_capacity(rows.len());
    for row in rows {
        runs.push(RunRow::from_row(row).map_err(query_err)?.into_run()?);
    }
    Ok(runs)
}

struct NodeResultRow {
    id: String,
    run_id: String,
    node_id: String,
    status: String,
    output: Option<String>,
    error: Option<String>,
    attempt_count: i64,
    started_at: String,
    finished_at: String,
}

impl NodeResultRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            node_id: row.try_get("node_id")?,
            status: row.try_get("status")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            attempt_count: row.try_get("attempt_count")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_result(self) -> Result<NodeResult, RepositoryError> {
        Ok(NodeResult {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            node_id: self.node_id,
            status: from_str_enum::<NodeStatus>(&self.status, "node status")?,
            output: self
                .output
                .as_deref()
                .map(|s| from_json(s, "node output"))
                .transpose()?,
            error: self.error,
            attempt_count: self.attempt_count as u32,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: parse_datetime(&self.finished_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_run_if_absent(&self, run: &ExecutionRun) -> Result<bool, RepositoryError> {
        // NULL keys never collide, so manual runs always insert.
        let result = sqlx::query(
            r#"INSERT INTO execution_runs
               (id, workflow_id, pinned_version, status, trigger_type, event_id, idempotency_key,
                trigger_payload, context, suspended_node, resume_at, error, created_at,
                started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(idempotency_key) DO NOTHING"#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(run.pinned_version as i64)
        .bind(run.status.as_str())
        .bind(run.trigger_type.as_str())
        .bind(&run.event_id)
        .bind(&run.idempotency_key)
        .bind(to_json(&run.trigger_payload)?)
        .bind(to_json(&run.context)?)
        .bind(&run.suspended_node)
        .bind(run.resume_at.as_ref().map(format_datetime))
        .bind(&run.error)
        .bind(format_datetime(&run.created_at))
        .bind(run.started_at.as_ref().map(format_datetime))
        .bind(run.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<ExecutionRun>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM execution_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(RunRow::from_row(&row).map_err(query_err)?.into_run()?)),
            None => Ok(None),
        }
    }

    async fn list_runs(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<ExecutionRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_runs WHERE workflow_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        into_runs(&rows)
    }

    async fn list_runs_by_status(
        &self,
        status: RunStatus,
    ) -> Result<Vec<ExecutionRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_runs WHERE status = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        into_runs(&rows)
    }

    async fn transition_status(
        &self,
        run_id: &Uuid,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<bool, RepositoryError> {
        let now = format_datetime(&Utc::now());
        let running = to == RunStatus::Running;
        let result = sqlx::query(
            r#"UPDATE execution_runs SET
                 status = ?1,
                 started_at = CASE WHEN ?2 THEN COALESCE(started_at, ?3) ELSE started_at END,
                 resume_at = CASE WHEN ?2 THEN NULL ELSE resume_at END,
                 finished_at = CASE WHEN ?4 THEN ?3 ELSE finished_at END
               WHERE id = ?5 AND status = ?6"#,
        )
        .bind(to.as_str())
        .bind(running)
        .bind(&now)
        .bind(to.is_terminal())
        .bind(run_id.to_string())
        .bind(from.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.guard_failure(run_id).await {
            RepositoryError::NotFound => Err(RepositoryError::NotFound),
            RepositoryError::Conflict(_) => Ok(false),
            other => Err(other),
        }
    }

    async fn set_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let result = sqlx::query(&format!(
            r#"UPDATE execution_runs SET
                 status = ?1,
                 error = COALESCE(?2, error),
                 started_at = CASE WHEN ?3 THEN COALESCE(started_at, ?4) ELSE started_at END,
                 finished_at = CASE WHEN ?5 THEN ?4 ELSE finished_at END
               WHERE id = ?6 AND {NOT_TERMINAL}"#
        ))
        .bind(status.as_str())
        .bind(error)
        .bind(status == RunStatus::Running)
        .bind(&now)
        .bind(status.is_terminal())
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(self.guard_failure(run_id).await)
        }
    }

    async fn save_context(
        &self,
        run_id: &Uuid,
        context: &Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE execution_runs SET context = ? WHERE id = ?")
            .bind(to_json(context)?)
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn suspend_run(
        &self,
        run_id: &Uuid,
        node_id: &str,
        resume_at: DateTime<Utc>,
        context: &Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(&format!(
            r#"UPDATE execution_runs SET
                 status = 'suspended', suspended_node = ?, resume_at = ?, context = ?
               WHERE id = ? AND {NOT_TERMINAL}"#
        ))
        .bind(node_id)
        .bind(format_datetime(&resume_at))
        .bind(to_json(context)?)
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(self.guard_failure(run_id).await)
        }
    }

    async fn due_suspended(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_runs WHERE status = 'suspended' AND resume_at <= ? ORDER BY resume_at ASC",
        )
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        into_runs(&rows)
    }

    async fn abort_active(&self, workflow_id: &Uuid, reason: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query(&format!(
            r#"UPDATE execution_runs SET status = 'aborted', error = ?, finished_at = ?
               WHERE workflow_id = ? AND {NOT_TERMINAL}"#
        ))
        .bind(reason)
        .bind(format_datetime(&Utc::now()))
        .bind(workflow_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected())
    }

    async fn append_node_result(&self, result: &NodeResult) -> Result<(), RepositoryError> {
        let output = result.output.as_ref().map(to_json).transpose()?;
        sqlx::query(
            r#"INSERT INTO node_results
               (id, run_id, node_id, status, output, error, attempt_count, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(result.id.to_string())
        .bind(result.run_id.to_string())
        .bind(&result.node_id)
        .bind(result.status.as_str())
        .bind(&output)
        .bind(&result.error)
        .bind(result.attempt_count as i64)
        .bind(format_datetime(&result.started_at))
        .bind(format_datetime(&result.finished_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn node_results(&self, run_id: &Uuid) -> Result<Vec<NodeResult>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM node_results WHERE run_id = ? ORDER BY rowid ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(NodeResultRow::from_row(row).map_err(query_err)?.into_result()?);
        }
        Ok(results)
    }

    async fn stats_for(&self, workflow_id: &Uuid) -> Result<WorkflowStats, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT
                 COUNT(*) AS total,
                 COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS successful,
                 COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                 MAX(finished_at) AS last_run
               FROM execution_runs
               WHERE workflow_id = ? AND status IN ('completed', 'failed', 'aborted')"#,
        )
        .bind(workflow_id.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let total: i64 = row.try_get("total").map_err(query_err)?;
        let successful: i64 = row.try_get("successful").map_err(query_err)?;
        let failed: i64 = row.try_get("failed").map_err(query_err)?;
        let last_run: Option<String> = row.try_get("last_run").map_err(query_err)?;

        Ok(WorkflowStats {
            total_executions: total as u64,
            successful_executions: successful as u64,
            failed_executions: failed as u64,
            last_run: last_run.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
