//! Execution engine: walks a pinned workflow snapshot node by node.
//!
//! Every node the walk reaches leaves exactly one `NodeResult`. Results are
//! persisted as soon as a node finishes, so a resumed or recovered run loads
//! them instead of executing the node again.
//!
//! Control flow per node, in topological order:
//! 1. already recorded (resume / recovery) -> reuse the stored outcome
//! 2. run failed earlier, or abort requested -> `skipped`
//! 3. no active incoming edge -> `skipped`
//! 4. delay node the run was parked on -> `success` with `resumed_at`
//! 5. otherwise execute the handler with per-attempt timeout and retries

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opsflow_types::config::EngineConfig;
use opsflow_types::error::RepositoryError;
use opsflow_types::event::EngineEvent;
use opsflow_types::execution::{ExecutionRun, NodeResult, NodeStatus, RunStatus};
use opsflow_types::workflow::Node;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::NodeScope;
use super::dispatcher::RunLauncher;
use super::handler::{HandlerRegistry, NodeExecutionError, NodeInput, NodeOutcome, TimeoutError};
use super::plan::{ExecutionPlan, Visit};
use super::retry::RetryPolicy;
use crate::event::bus::EventBus;
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

/// Error recorded on runs stopped through [`ExecutionEngine::abort`].
pub const ABORTED_BY_REQUEST: &str = "aborted by request";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that stop the engine from driving a run at all. Node and run
/// failures are not errors here: they end up in the run's terminal status.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Node execution outcome
// ---------------------------------------------------------------------------

enum Executed {
    Succeeded {
        output: Value,
        branch: Option<String>,
        attempts: u32,
    },
    Suspended {
        resume_at: DateTime<Utc>,
    },
    Failed {
        error: NodeExecutionError,
        attempts: u32,
    },
    Cancelled,
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Drives runs to a terminal (or suspended) status.
///
/// Generic over the repository traits. Many runs may be driven concurrently;
/// within one run nodes execute sequentially.
pub struct ExecutionEngine<W: WorkflowRepository, E: ExecutionRepository> {
    workflows: Arc<W>,
    executions: Arc<E>,
    registry: Arc<HandlerRegistry>,
    event_bus: EventBus,
    config: EngineConfig,
    /// Cancellation tokens keyed by run_id for runs driven by this process.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<W: WorkflowRepository, E: ExecutionRepository> ExecutionEngine<W, E> {
    pub fn new(
        workflows: Arc<W>,
        executions: Arc<E>,
        registry: Arc<HandlerRegistry>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows,
            executions,
            registry,
            event_bus,
            config,
            cancellation_tokens: DashMap::new(),
        }
    }

    /// Number of runs currently being driven by this engine.
    pub fn active_runs(&self) -> usize {
        self.cancellation_tokens.len()
    }

    /// Claim a pending run and drive it. A run that is no longer pending
    /// (another worker claimed it) is left alone and its status returned.
    pub async fn run(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        let run = self.load_run(&run_id).await?;
        if !self
            .executions
            .transition_status(&run_id, RunStatus::Pending, RunStatus::Running)
            .await?
        {
            tracing::debug!(run_id = %run_id, "run already claimed");
            return Ok(self.load_run(&run_id).await?.status);
        }

        self.event_bus.publish(EngineEvent::RunStarted {
            run_id,
            workflow_id: run.workflow_id,
            pinned_version: run.pinned_version,
        });
        tracing::info!(
            run_id = %run_id,
            workflow_id = %run.workflow_id,
            version = run.pinned_version,
            "starting workflow run"
        );

        self.drive(run_id).await
    }

    /// Claim a suspended run (`suspended -> running`) and continue it.
    pub async fn resume(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        let run = self.load_run(&run_id).await?;
        if !self
            .executions
            .transition_status(&run_id, RunStatus::Suspended, RunStatus::Running)
            .await?
        {
            tracing::debug!(run_id = %run_id, "suspended run already claimed");
            return Ok(self.load_run(&run_id).await?.status);
        }

        self.event_bus.publish(EngineEvent::RunResumed {
            run_id,
            node_id: run.suspended_node.clone().unwrap_or_default(),
        });
        tracing::info!(run_id = %run_id, node_id = ?run.suspended_node, "resuming workflow run");

        self.drive(run_id).await
    }

    /// Re-drive a run left `pending` or `running` by a previous process.
    /// Only call at startup, before any other worker could be driving it.
    pub async fn recover(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        let run = self.load_run(&run_id).await?;
        match run.status {
            RunStatus::Pending => self.run(run_id).await,
            RunStatus::Running => {
                tracing::warn!(run_id = %run_id, "recovering interrupted run");
                self.drive(run_id).await
            }
            other => Ok(other),
        }
    }

    /// Request that a run stop. Persists `aborted` immediately; an in-flight
    /// walk stops before its next node. Side effects already performed are
    /// not rolled back.
    pub async fn abort(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        let run = self.load_run(&run_id).await?;
        if run.status.is_terminal() {
            return Ok(run.status);
        }

        match self
            .executions
            .set_status(&run_id, RunStatus::Aborted, Some(ABORTED_BY_REQUEST))
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Ok(self.load_run(&run_id).await?.status),
            Err(e) => return Err(e.into()),
        }

        if let Some(token) = self.cancellation_tokens.get(&run_id) {
            token.cancel();
        }
        self.event_bus.publish(EngineEvent::RunAborted { run_id });
        tracing::info!(run_id = %run_id, "run aborted");
        Ok(RunStatus::Aborted)
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    async fn load_run(&self, run_id: &Uuid) -> Result<ExecutionRun, EngineError> {
        self.executions
            .get_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(*run_id))
    }

    /// Walk the run under the run timeout. The timeout covers one
    /// uninterrupted stretch; time spent suspended does not count.
    async fn drive(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        let token = CancellationToken::new();
        self.cancellation_tokens.insert(run_id, token.clone());

        let run_timeout = Duration::from_secs(self.config.run_timeout_secs);
        let result = tokio::time::timeout(run_timeout, self.walk(run_id, &token)).await;

        self.cancellation_tokens.remove(&run_id);

        match result {
            Ok(status) => status,
            Err(_elapsed) => {
                let error = TimeoutError::Run {
                    secs: self.config.run_timeout_secs,
                }
                .to_string();
                tracing::warn!(run_id = %run_id, "run timed out");
                self.skip_unrecorded(run_id).await?;
                self.finish(run_id, RunStatus::Failed, Some(error)).await
            }
        }
    }

    async fn walk(&self, run_id: Uuid, token: &CancellationToken) -> Result<RunStatus, EngineError> {
        let run = self.load_run(&run_id).await?;

        let Some(def) = self
            .workflows
            .get_version(&run.workflow_id, run.pinned_version)
            .await?
        else {
            let error = format!(
                "version {} of workflow {} not found",
                run.pinned_version, run.workflow_id
            );
            return self.finish(run_id, RunStatus::Failed, Some(error)).await;
        };

        let plan = match ExecutionPlan::build(&def) {
            Ok(plan) => plan,
            Err(e) => return self.finish(run_id, RunStatus::Failed, Some(e.to_string())).await,
        };

        let recorded: HashMap<String, NodeResult> = self
            .executions
            .node_results(&run_id)
            .await?
            .into_iter()
            .map(|r| (r.node_id.clone(), r))
            .collect();

        let mut context = run.context.clone();
        let mut visits: HashMap<String, Visit> = HashMap::new();
        let mut failure: Option<String> = None;
        let mut aborted = false;

        for node in plan.order() {
            // 1. Recorded by an earlier stretch of this run.
            if let Some(prev) = recorded.get(&node.id) {
                tracing::debug!(run_id = %run_id, node_id = %node.id, "reusing recorded result");
                if let Some(output) = &prev.output {
                    context.entry(node.id.clone()).or_insert_with(|| output.clone());
                }
                visits.insert(node.id.clone(), recorded_visit(&plan, node, prev));
                continue;
            }

            // 2. Halted: failure, abort request, or the run was stopped
            //    elsewhere (delete, abort from another process).
            if !aborted && failure.is_none() && self.stop_requested(run_id, token).await? {
                aborted = true;
            }
            if aborted || failure.is_some() {
                self.record_skipped(run_id, node).await?;
                visits.insert(node.id.clone(), skipped_visit());
                continue;
            }

            // 3. Not on a resolved branch.
            if !plan.should_run(&node.id, &visits) {
                self.record_skipped(run_id, node).await?;
                visits.insert(node.id.clone(), skipped_visit());
                continue;
            }

            // 4. Delay node the run was parked on.
            if run.suspended_node.as_deref() == Some(node.id.as_str()) {
                let now = Utc::now();
                let output = json!({ "resumed_at": now.to_rfc3339() });
                self.record(run_id, node, NodeStatus::Success, Some(output.clone()), None, 0, now)
                    .await?;
                context.insert(node.id.clone(), output);
                self.executions.save_context(&run_id, &context).await?;
                visits.insert(
                    node.id.clone(),
                    Visit {
                        status: NodeStatus::Success,
                        branch: None,
                        continue_on_error: node.continue_on_error(),
                    },
                );
                continue;
            }

            // 5. Execute.
            let started_at = Utc::now();
            let started = Instant::now();
            match self
                .execute_node(&run, &plan, node, &context, token)
                .await
            {
                Executed::Succeeded {
                    output,
                    branch,
                    attempts,
                } => {
                    self.record(
                        run_id,
                        node,
                        NodeStatus::Success,
                        Some(output.clone()),
                        None,
                        attempts,
                        started_at,
                    )
                    .await?;
                    context.insert(node.id.clone(), output);
                    self.executions.save_context(&run_id, &context).await?;
                    self.event_bus.publish(EngineEvent::NodeCompleted {
                        run_id,
                        node_id: node.id.clone(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                    visits.insert(
                        node.id.clone(),
                        Visit {
                            status: NodeStatus::Success,
                            branch,
                            continue_on_error: node.continue_on_error(),
                        },
                    );
                }
                Executed::Suspended { resume_at } => {
                    match self
                        .executions
                        .suspend_run(&run_id, &node.id, resume_at, &context)
                        .await
                    {
                        Ok(()) => {}
                        Err(RepositoryError::Conflict(_)) => {
                            return Ok(self.load_run(&run_id).await?.status);
                        }
                        Err(e) => return Err(e.into()),
                    }
                    self.event_bus.publish(EngineEvent::RunSuspended {
                        run_id,
                        node_id: node.id.clone(),
                        resume_at,
                    });
                    tracing::info!(
                        run_id = %run_id,
                        node_id = %node.id,
                        resume_at = %resume_at,
                        "run suspended"
                    );
                    return Ok(RunStatus::Suspended);
                }
                Executed::Failed { error, attempts } => {
                    let message = error.to_string();
                    self.record(
                        run_id,
                        node,
                        NodeStatus::Failed,
                        None,
                        Some(message.clone()),
                        attempts,
                        started_at,
                    )
                    .await?;
                    if node.continue_on_error() {
                        tracing::warn!(
                            run_id = %run_id,
                            node_id = %node.id,
                            error = %message,
                            "node failed, continuing"
                        );
                        context.insert(node.id.clone(), json!({ "error": message }));
                        self.executions.save_context(&run_id, &context).await?;
                    } else {
                        failure = Some(format!("node '{}' failed: {message}", node.id));
                    }
                    visits.insert(
                        node.id.clone(),
                        Visit {
                            status: NodeStatus::Failed,
                            branch: None,
                            continue_on_error: node.continue_on_error(),
                        },
                    );
                }
                Executed::Cancelled => {
                    self.record_skipped(run_id, node).await?;
                    visits.insert(node.id.clone(), skipped_visit());
                    aborted = true;
                }
            }
        }

        if aborted {
            tracing::info!(run_id = %run_id, "run stopped after abort");
            return Ok(self.load_run(&run_id).await?.status);
        }

        match failure {
            Some(error) => self.finish(run_id, RunStatus::Failed, Some(error)).await,
            None => self.finish(run_id, RunStatus::Completed, None).await,
        }
    }

    /// Abort was requested locally, or the stored run is already terminal.
    async fn stop_requested(
        &self,
        run_id: Uuid,
        token: &CancellationToken,
    ) -> Result<bool, EngineError> {
        if token.is_cancelled() {
            return Ok(true);
        }
        let stored = self.load_run(&run_id).await?;
        Ok(stored.status.is_terminal())
    }

    async fn execute_node(
        &self,
        run: &ExecutionRun,
        plan: &ExecutionPlan,
        node: &Node,
        context: &Map<String, Value>,
        token: &CancellationToken,
    ) -> Executed {
        let Some(handler) = self.registry.get(&node.node_type) else {
            return Executed::Failed {
                error: NodeExecutionError::UnknownType(node.node_type.clone()),
                attempts: 0,
            };
        };

        let policy = RetryPolicy::resolve(node, handler.default_max_retries_dyn(), &self.config);
        let scope = NodeScope::for_node(plan, &node.id, &run.trigger_payload, context);
        let mut attempt: u32 = 1;

        loop {
            self.event_bus.publish(EngineEvent::NodeStarted {
                run_id: run.id,
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                attempt,
            });

            let input = NodeInput {
                run_id: run.id,
                workflow_id: run.workflow_id,
                node: node.clone(),
                scope: scope.clone(),
                attempt,
            };

            let result = match tokio::time::timeout(policy.timeout, handler.execute_boxed(&input))
                .await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(TimeoutError::Node {
                    node_id: node.id.clone(),
                    secs: policy.timeout.as_secs(),
                }
                .into()),
            };

            let error = match result {
                Ok(NodeOutcome::Output(output)) => {
                    return Executed::Succeeded {
                        output,
                        branch: None,
                        attempts: attempt,
                    };
                }
                Ok(NodeOutcome::Branch { label, output }) => {
                    return Executed::Succeeded {
                        output: with_branch(output, &label),
                        branch: Some(label),
                        attempts: attempt,
                    };
                }
                Ok(NodeOutcome::Suspend { resume_at }) => {
                    return Executed::Suspended { resume_at };
                }
                Err(error) => error,
            };

            let will_retry = error.is_retryable() && policy.should_retry(attempt);
            tracing::warn!(
                run_id = %run.id,
                node_id = %node.id,
                attempt,
                will_retry,
                error = %error,
                "node attempt failed"
            );
            self.event_bus.publish(EngineEvent::NodeFailed {
                run_id: run.id,
                node_id: node.id.clone(),
                error: error.to_string(),
                will_retry,
            });
            if !will_retry {
                return Executed::Failed {
                    error,
                    attempts: attempt,
                };
            }

            let delay = policy.backoff(attempt);
            tokio::select! {
                _ = token.cancelled() => return Executed::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Persistence helpers
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        run_id: Uuid,
        node: &Node,
        status: NodeStatus,
        output: Option<Value>,
        error: Option<String>,
        attempt_count: u32,
        started_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let result = NodeResult {
            id: Uuid::now_v7(),
            run_id,
            node_id: node.id.clone(),
            status,
            output,
            error,
            attempt_count,
            started_at,
            finished_at: Utc::now(),
        };
        self.executions.append_node_result(&result).await?;
        Ok(())
    }

    async fn record_skipped(&self, run_id: Uuid, node: &Node) -> Result<(), EngineError> {
        tracing::debug!(run_id = %run_id, node_id = %node.id, "node skipped");
        self.event_bus.publish(EngineEvent::NodeSkipped {
            run_id,
            node_id: node.id.clone(),
        });
        self.record(run_id, node, NodeStatus::Skipped, None, None, 0, Utc::now())
            .await
    }

    /// Mark every node without a result as skipped. Used after a run timeout
    /// cut the walk short.
    async fn skip_unrecorded(&self, run_id: Uuid) -> Result<(), EngineError> {
        let run = self.load_run(&run_id).await?;
        let Some(def) = self
            .workflows
            .get_version(&run.workflow_id, run.pinned_version)
            .await?
        else {
            return Ok(());
        };
        let recorded: std::collections::HashSet<String> = self
            .executions
            .node_results(&run_id)
            .await?
            .into_iter()
            .map(|r| r.node_id)
            .collect();
        for node in def.nodes.iter().filter(|n| !recorded.contains(&n.id)) {
            self.record_skipped(run_id, node).await?;
        }
        Ok(())
    }

    /// Persist a terminal status. If the run was stopped concurrently (abort,
    /// delete) the stored terminal status wins and is returned.
    async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<RunStatus, EngineError> {
        match self
            .executions
            .set_status(&run_id, status, error.as_deref())
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return Ok(self.load_run(&run_id).await?.status);
            }
            Err(e) => return Err(e.into()),
        }

        let workflow_id = self.load_run(&run_id).await?.workflow_id;
        match (&status, error) {
            (RunStatus::Failed, Some(error)) => {
                tracing::warn!(run_id = %run_id, error = %error, "run failed");
                self.event_bus.publish(EngineEvent::RunFailed {
                    run_id,
                    workflow_id,
                    error,
                });
            }
            _ => {
                tracing::info!(run_id = %run_id, status = %status, "run finished");
                self.event_bus.publish(EngineEvent::RunCompleted {
                    run_id,
                    workflow_id,
                });
            }
        }
        Ok(status)
    }
}

fn skipped_visit() -> Visit {
    Visit {
        status: NodeStatus::Skipped,
        branch: None,
        continue_on_error: false,
    }
}

/// Rebuild a visit from a stored result. The branch of a condition node is
/// read back from its output.
fn recorded_visit(plan: &ExecutionPlan, node: &Node, result: &NodeResult) -> Visit {
    let labeled = plan
        .outgoing(&node.id)
        .iter()
        .any(|e| e.branch_label.is_some());
    let branch = if labeled {
        result
            .output
            .as_ref()
            .and_then(|o| o.get("branch"))
            .and_then(Value::as_str)
            .map(String::from)
    } else {
        None
    };
    Visit {
        status: result.status,
        branch,
        continue_on_error: node.continue_on_error(),
    }
}

/// Make sure a branching node's stored output names its branch.
fn with_branch(output: Value, label: &str) -> Value {
    match output {
        Value::Object(mut map) => {
            map.entry("branch".to_string())
                .or_insert_with(|| Value::String(label.to_string()));
            Value::Object(map)
        }
        other => json!({ "branch": label, "value": other }),
    }
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Hands runs to the engine on background tasks.
pub struct EngineLauncher<W: WorkflowRepository, E: ExecutionRepository> {
    engine: Arc<ExecutionEngine<W, E>>,
}

impl<W: WorkflowRepository, E: ExecutionRepository> EngineLauncher<W, E> {
    pub fn new(engine: Arc<ExecutionEngine<W, E>>) -> Self {
        Self { engine }
    }
}

impl<W, E> RunLauncher for EngineLauncher<W, E>
where
    W: WorkflowRepository + 'static,
    E: ExecutionRepository + 'static,
{
    fn launch(&self, run_id: Uuid) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(e) = engine.run(run_id).await {
                tracing::error!(run_id = %run_id, error = %e, "run could not be driven");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
