//! Background pollers: schedule ticks, due suspended runs, startup recovery.
//!
//! Pollers hold no state beyond the previous schedule poll time. Everything
//! they act on is read from the stores, and every action is guarded there
//! (idempotency key for ticks, status compare-and-swap for resumes), so any
//! number of pollers may run against one database.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opsflow_types::config::SchedulerConfig;
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::RunStatus;
use opsflow_types::workflow::TriggerType;
use tokio_util::sync::CancellationToken;

use super::dispatcher::TriggerDispatcher;
use super::engine::ExecutionEngine;
use super::schedule::{due_ticks, schedule_of};
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

/// Upper bound on catch-up ticks per workflow per poll.
pub const MAX_CATCHUP_TICKS: usize = 10;

pub struct Poller<W: WorkflowRepository, E: ExecutionRepository> {
    workflows: Arc<W>,
    executions: Arc<E>,
    dispatcher: Arc<TriggerDispatcher<W, E>>,
    engine: Arc<ExecutionEngine<W, E>>,
    config: SchedulerConfig,
}

impl<W, E> Poller<W, E>
where
    W: WorkflowRepository + 'static,
    E: ExecutionRepository + 'static,
{
    pub fn new(
        workflows: Arc<W>,
        executions: Arc<E>,
        dispatcher: Arc<TriggerDispatcher<W, E>>,
        engine: Arc<ExecutionEngine<W, E>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            workflows,
            executions,
            dispatcher,
            engine,
            config,
        }
    }

    /// Dispatch every schedule tick in `(after, now]` for active schedule
    /// workflows. Returns the number of runs created.
    pub async fn poll_schedules(
        &self,
        after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let defs = self
            .workflows
            .list_active_by_trigger(TriggerType::Schedule)
            .await?;

        let mut created = 0;
        for def in &defs {
            let Some((node_id, schedule)) = schedule_of(def) else {
                tracing::warn!(workflow_id = %def.id, "schedule workflow has no schedule");
                continue;
            };
            let ticks = match due_ticks(schedule, after, now, MAX_CATCHUP_TICKS) {
                Ok(ticks) => ticks,
                Err(e) => {
                    tracing::warn!(workflow_id = %def.id, node_id, error = %e, "bad schedule");
                    continue;
                }
            };
            for tick in ticks {
                match self.dispatcher.dispatch_schedule_tick(def, tick).await {
                    Ok(Some(_)) => created += 1,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            workflow_id = %def.id,
                            tick = %tick,
                            error = %e,
                            "schedule dispatch failed"
                        );
                    }
                }
            }
        }
        if created > 0 {
            tracing::info!(created, "schedule poll dispatched runs");
        }
        Ok(created)
    }

    /// Hand every suspended run due at `now` to the engine. The engine's
    /// claim decides which poller actually resumes a run. Returns the number
    /// of runs handed over.
    pub async fn resume_due(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let due = self.executions.due_suspended(now).await?;
        for run in &due {
            let engine = Arc::clone(&self.engine);
            let run_id = run.id;
            tokio::spawn(async move {
                if let Err(e) = engine.resume(run_id).await {
                    tracing::error!(run_id = %run_id, error = %e, "resume failed");
                }
            });
        }
        Ok(due.len())
    }

    /// Re-drive runs a previous process left `pending` or `running`.
    /// Call once at startup, before the pollers and the API start.
    pub async fn recover_interrupted(&self) -> Result<usize, RepositoryError> {
        let mut stale = self.executions.list_runs_by_status(RunStatus::Running).await?;
        stale.extend(self.executions.list_runs_by_status(RunStatus::Pending).await?);

        for run in &stale {
            let engine = Arc::clone(&self.engine);
            let run_id = run.id;
            tokio::spawn(async move {
                if let Err(e) = engine.recover(run_id).await {
                    tracing::error!(run_id = %run_id, error = %e, "recovery failed");
                }
            });
        }
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "recovering interrupted runs");
        }
        Ok(stale.len())
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let poll_every = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let resume_every = Duration::from_secs(self.config.resume_interval_secs.max(1));
        let mut schedule_tick = tokio::time::interval(poll_every);
        let mut resume_tick = tokio::time::interval(resume_every);

        // The first poll looks back one window.
        let mut last_poll = Utc::now() - chrono::Duration::from_std(poll_every).unwrap_or_default();

        tracing::info!(
            poll_interval_secs = poll_every.as_secs(),
            resume_interval_secs = resume_every.as_secs(),
            "pollers started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = schedule_tick.tick() => {
                    let now = Utc::now();
                    match self.poll_schedules(last_poll, now).await {
                        Ok(_) => last_poll = now,
                        Err(e) => tracing::warn!(error = %e, "schedule poll failed"),
                    }
                }

                _ = resume_tick.tick() => {
                    if let Err(e) = self.resume_due(Utc::now()).await {
                        tracing::warn!(error = %e, "resume poll failed");
                    }
                }
            }
        }

        tracing::info!("pollers stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
