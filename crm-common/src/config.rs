//! Bootstrap configuration
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (`--port`, `--database`, `--log-level`)
//! 2. Environment variables (`CRM_CONFIG` selects the TOML file)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! A missing default config file is not an error; the engine starts on
//! built-in defaults. An explicitly named file that is missing or malformed is.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "CRM_CONFIG";

const APP_DIR: &str = "crm-engine";

/// Configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Engine tuning (`[engine]` table)
    #[serde(default)]
    pub engine: EngineSettings,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            port: default_port(),
            logging: LoggingConfig::default(),
            engine: EngineSettings::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Limits and thresholds for the engine services
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Max raw records read per metrics aggregation
    pub aggregation_scan_limit: i64,
    /// Min hours between two `customer_updated` entries for one customer
    pub customer_updated_throttle_hours: i64,
    /// Conversations replayed per customer recalculation
    pub recalculate_conversation_activity_limit: i64,
    /// Failed ids reported by bulk recalculation
    pub max_failed_ids: usize,
    pub refresh_batch_size: i64,
    pub priority_group_top_n: i64,
    pub dashboard_page_size: i64,
    /// Max time to keep retrying a write on SQLite lock contention
    pub db_max_lock_wait_ms: u64,
    pub event_bus_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            aggregation_scan_limit: 5000,
            customer_updated_throttle_hours: 24,
            recalculate_conversation_activity_limit: 100,
            max_failed_ids: 10,
            refresh_batch_size: 500,
            priority_group_top_n: 10,
            dashboard_page_size: 20,
            db_max_lock_wait_ms: 5000,
            event_bus_capacity: 1000,
        }
    }
}

fn default_port() -> u16 {
    5760
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR).join("crm.db"))
        .unwrap_or_else(|| PathBuf::from("./crm_data/crm.db"))
}

/// Locate the config file: explicit path, then `CRM_CONFIG`, then user and system defaults
///
/// Returns `(path, explicit)`; explicit paths must exist.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<(PathBuf, bool)> {
    if let Some(path) = cli_path {
        return Some((path.to_path_buf(), true));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some((PathBuf::from(path), true));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some((path, false));
        }
    }

    let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
    if system_config.exists() {
        return Some((system_config, false));
    }

    None
}

/// Load the TOML config, falling back to defaults when none is found
pub fn load_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    let Some((path, explicit)) = resolve_config_path(cli_path) else {
        warn!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        if explicit {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse TOML text into a config
pub fn parse_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig =
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

impl TomlConfig {
    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if e.aggregation_scan_limit <= 0 {
            return Err(Error::Config(
                "engine.aggregation_scan_limit must be positive".to_string(),
            ));
        }
        if e.refresh_batch_size <= 0 || e.dashboard_page_size <= 0 {
            return Err(Error::Config(
                "engine batch and page sizes must be positive".to_string(),
            ));
        }
        if e.event_bus_capacity == 0 {
            return Err(Error::Config(
                "engine.event_bus_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
