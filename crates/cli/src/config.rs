//! Application configuration loaded from an optional JSON file.

use std::path::Path;

use anyhow::Context;
use engine::ExecutorConfig;
use serde::Deserialize;

/// Everything the binary needs besides its sub-command arguments.
///
/// Flags and environment variables win over values read from the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub executor: ExecutorConfig,
    /// Postgres URL for the run log; runs are only traced when unset.
    pub database_url: Option<String>,
    /// `tracing` filter directive, e.g. `info` or `engine=debug`.
    pub log_level: Option<String>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Apply command-line / environment overrides.
    pub fn merge(mut self, database_url: Option<String>, log_level: Option<String>) -> Self {
        if database_url.is_some() {
            self.database_url = database_url;
        }
        if log_level.is_some() {
            self.log_level = log_level;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn partial_config_keeps_executor_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "executor": { "max_parallel_nodes": 1, "node_timeouts_ms": { "excel_report": 120000 } } }"#,
        )
        .unwrap();

        assert_eq!(config.executor.max_parallel_nodes, 1);
        assert_eq!(config.executor.max_retries, 3);
        assert_eq!(config.executor.timeout_for("excel_report"), Duration::from_secs(120));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn flags_override_file_values() {
        let config = AppConfig {
            database_url: Some("postgres://file".into()),
            log_level: Some("warn".into()),
            ..AppConfig::default()
        }
        .merge(Some("postgres://flag".into()), None);

        assert_eq!(config.database_url.as_deref(), Some("postgres://flag"));
        assert_eq!(config.log_level.as_deref(), Some("warn"));
    }
}
