//! Retry policy for node execution.
//!
//! Stateless: the policy is resolved per node from (in priority order) the
//! node's `max_retries` / `timeout_secs` config, the handler's default, and
//! the engine config.

use std::time::Duration;

use opsflow_types::config::EngineConfig;
use opsflow_types::workflow::Node;

/// Resolved retry and timeout settings for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn resolve(node: &Node, handler_default: u32, config: &EngineConfig) -> Self {
        let max_retries = node
            .config_u64("max_retries")
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(handler_default);
        let timeout_secs = node
            .config_u64("timeout_secs")
            .filter(|secs| *secs > 0)
            .unwrap_or(config.node_timeout_secs);

        Self {
            max_retries,
            timeout: Duration::from_secs(timeout_secs),
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_max_ms),
        }
    }

    /// Whether another attempt may follow failed attempt number `attempt`
    /// (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before the attempt following failed attempt `attempt`:
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
