//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! Services are generic over the repository traits; AppState pins them to the
//! SQLite implementations.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use opsflow_core::event::bus::EventBus;
use opsflow_core::workflow::definition::DefinitionService;
use opsflow_core::workflow::dispatcher::{RunLauncher, TriggerDispatcher};
use opsflow_core::workflow::engine::{EngineError, EngineLauncher, ExecutionEngine};
use opsflow_core::workflow::handler::HandlerRegistry;
use opsflow_core::workflow::poller::Poller;
use opsflow_infra::config::{load_config, resolve_data_dir, resolve_database_url};
use opsflow_infra::http_node::WebhookCallHandler;
use opsflow_infra::sqlite::execution::SqliteExecutionRepository;
use opsflow_infra::sqlite::pool::DatabasePool;
use opsflow_infra::sqlite::workflow::SqliteWorkflowRepository;
use opsflow_types::config::OpsflowConfig;
use opsflow_types::execution::RunStatus;
use uuid::Uuid;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type Workflows = SqliteWorkflowRepository;
pub type Executions = SqliteExecutionRepository;

pub type ConcreteDefinitionService = DefinitionService<Workflows, Executions>;
pub type ConcreteDispatcher = TriggerDispatcher<Workflows, Executions>;
pub type ConcreteEngine = ExecutionEngine<Workflows, Executions>;
pub type ConcretePoller = Poller<Workflows, Executions>;

/// How dispatched runs reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Each run is driven on its own tokio task (server).
    Background,
    /// Runs are collected and driven by the caller before it exits (CLI).
    Inline,
}

/// Collects launched run ids for [`LaunchMode::Inline`].
#[derive(Default)]
pub struct InlineLauncher {
    pending: Mutex<Vec<Uuid>>,
}

impl InlineLauncher {
    fn take(&self) -> Vec<Uuid> {
        self.pending
            .lock()
            .map(|mut ids| std::mem::take(&mut *ids))
            .unwrap_or_default()
    }
}

impl RunLauncher for InlineLauncher {
    fn launch(&self, run_id: Uuid) {
        if let Ok(mut ids) = self.pending.lock() {
            ids.push(run_id);
        }
    }
}

/// Shared application state holding all services.
#[derive(Clone)]
pub struct AppState {
    pub definitions: Arc<ConcreteDefinitionService>,
    pub dispatcher: Arc<ConcreteDispatcher>,
    pub engine: Arc<ConcreteEngine>,
    pub poller: Arc<ConcretePoller>,
    pub executions: Arc<Executions>,
    pub event_bus: EventBus,
    pub config: OpsflowConfig,
    pub data_dir: PathBuf,
    inline: Option<Arc<InlineLauncher>>,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init(mode: LaunchMode) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_config(&data_dir).await;
        let db_url = resolve_database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&db_url).await?;

        Self::from_parts(db_pool, config, data_dir, mode)
    }

    /// Wire services over an open pool.
    pub fn from_parts(
        db_pool: DatabasePool,
        config: OpsflowConfig,
        data_dir: PathBuf,
        mode: LaunchMode,
    ) -> anyhow::Result<Self> {
        let workflows = Arc::new(SqliteWorkflowRepository::new(db_pool.clone()));
        let executions = Arc::new(SqliteExecutionRepository::new(db_pool));

        let mut registry = HandlerRegistry::with_builtins();
        registry.register(WebhookCallHandler::new(&config.webhook_call)?);
        tracing::debug!(node_types = ?registry.node_types(), "node handlers registered");

        let event_bus = EventBus::new(config.engine.event_capacity);
        let engine = Arc::new(ExecutionEngine::new(
            workflows.clone(),
            executions.clone(),
            Arc::new(registry),
            event_bus.clone(),
            config.engine.clone(),
        ));

        let inline = (mode == LaunchMode::Inline).then(|| Arc::new(InlineLauncher::default()));
        let launcher: Arc<dyn RunLauncher> = match &inline {
            Some(inline) => inline.clone(),
            None => Arc::new(EngineLauncher::new(engine.clone())),
        };

        let dispatcher = Arc::new(TriggerDispatcher::new(
            workflows.clone(),
            executions.clone(),
            launcher,
        ));
        let poller = Arc::new(Poller::new(
            workflows.clone(),
            executions.clone(),
            dispatcher.clone(),
            engine.clone(),
            config.scheduler.clone(),
        ));
        let definitions = Arc::new(DefinitionService::new(workflows, executions.clone()));

        Ok(Self {
            definitions,
            dispatcher,
            engine,
            poller,
            executions,
            event_bus,
            config,
            data_dir,
            inline,
        })
    }

    /// Drive every run launched since the last call, in launch order.
    ///
    /// Only meaningful in [`LaunchMode::Inline`]; background runs are
    /// already on their own tasks.
    pub async fn drive_launched(&self) -> Result<Vec<(Uuid, RunStatus)>, EngineError> {
        let Some(inline) = &self.inline else {
            return Ok(Vec::new());
        };
        let mut outcomes = Vec::new();
        for run_id in inline.take() {
            let status = self.engine.run(run_id).await?;
            outcomes.push((run_id, status));
        }
        Ok(outcomes)
    }
}
