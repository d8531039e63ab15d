use crate::utils::{DEFAULT_LEDGER_KEY, DEFAULT_LOCK_KEY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn default_ledger_key() -> String {
    DEFAULT_LEDGER_KEY.to_string()
}

fn default_lock_key() -> String {
    DEFAULT_LOCK_KEY.to_string()
}

fn default_advisory_lock() -> bool {
    true
}

/// Two minutes per migration
fn default_migration_timeout_ms() -> u64 {
    120_000
}

/// Ten minutes before a leftover lock marker counts as abandoned
fn default_lock_stale_after_ms() -> Option<u64> {
    Some(600_000)
}

/// Migration engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Store key holding the set of applied migrations.
    #[serde(default = "default_ledger_key")]
    pub ledger_key: String,
    /// Store key holding the run-lock marker.
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    /// Guard runs with a marker key in the store. Disable only when the host
    /// guarantees a single runner per store.
    #[serde(default = "default_advisory_lock")]
    pub advisory_lock: bool,
    /// Upper bound for a single migration's apply routine.
    #[serde(default = "default_migration_timeout_ms")]
    pub migration_timeout_ms: u64,
    /// Age after which a lock marker is taken over. `null` never takes over.
    #[serde(default = "default_lock_stale_after_ms")]
    pub lock_stale_after_ms: Option<u64>,
    /// Record domains the built-in record migrations operate on.
    #[serde(default)]
    pub record_domains: Vec<String>,
}

impl EngineConfig {
    pub fn migration_timeout(&self) -> Duration {
        Duration::from_millis(self.migration_timeout_ms)
    }

    pub fn lock_stale_after(&self) -> Option<Duration> {
        self.lock_stale_after_ms.map(Duration::from_millis)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_key: default_ledger_key(),
            lock_key: default_lock_key(),
            advisory_lock: default_advisory_lock(),
            migration_timeout_ms: default_migration_timeout_ms(),
            lock_stale_after_ms: default_lock_stale_after_ms(),
            record_domains: Vec::new(),
        }
    }
}

/// Read the configuration file
pub async fn read_config(config_path: &Path) -> Result<Option<EngineConfig>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(config_path).await?;
    let config: EngineConfig = serde_json::from_str(&content)?;
    Ok(Some(config))
}

/// Write the configuration file
pub async fn write_config(config_path: &Path, config: &EngineConfig) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content).await?;
    Ok(())
}
