//! Configuration loader for Opsflow.
//!
//! Reads `config.toml` from the data directory (`~/.opsflow/` by default) and
//! deserializes it into [`OpsflowConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use opsflow_types::config::OpsflowConfig;

use crate::sqlite::pool::database_url;

/// Load configuration from `{data_dir}/config.toml`.
pub async fn load_config(data_dir: &Path) -> OpsflowConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return OpsflowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return OpsflowConfig::default();
        }
    };

    match toml::from_str::<OpsflowConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            OpsflowConfig::default()
        }
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `OPSFLOW_DATA_DIR` environment variable
/// 2. `~/.opsflow`
/// 3. `.opsflow` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("OPSFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".opsflow");
    }

    PathBuf::from(".opsflow")
}

/// The database URL to open: the configured one, or the file in `data_dir`.
pub fn resolve_database_url(config: &OpsflowConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| database_url(data_dir))
}
