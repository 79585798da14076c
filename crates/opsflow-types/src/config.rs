//! Global configuration types.
//!
//! [`OpsflowConfig`] is deserialized from `config.toml` in the data directory.
//! Every field has a default so a partial (or missing) file is valid.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpsflowConfig {
    /// Explicit database URL. When absent, `{data_dir}/opsflow.db` is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub webhook_call: WebhookCallConfig,
}

/// REST server bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Execution engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-node attempt timeout (default 5 minutes). Overridable per node
    /// with `timeout_secs`.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    /// Limit on one uninterrupted stretch of a run (default 30 minutes).
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// First retry delay.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Upper bound on any single retry delay.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Broadcast channel capacity for engine events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: default_node_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_node_timeout_secs() -> u64 {
    300
}

fn default_run_timeout_secs() -> u64 {
    1800
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_event_capacity() -> usize {
    1024
}

/// Poller resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often schedule triggers are evaluated.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How often suspended runs are checked for resumption.
    #[serde(default = "default_resume_interval_secs")]
    pub resume_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            resume_interval_secs: default_resume_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_resume_interval_secs() -> u64 {
    5
}

/// Outbound HTTP settings for `webhook_call` nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookCallConfig {
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebhookCallConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "opsflow-workflow/0.1".to_string()
}
