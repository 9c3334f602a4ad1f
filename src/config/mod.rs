//! Configuration management for slideforge
//!
//! Layered loading:
//! 1. Default values embedded in the structs
//! 2. TOML configuration file (`SLIDEFORGE_CONFIG`, default
//!    `config/slideforge.toml`)
//! 3. `SLIDEFORGE__<section>__<key>` environment overrides
//! 4. Flat deployment variables (`PORT`, `DATABASE_URL`, `JOB_TIMEOUT`,
//!    `WORKER_COUNT`, `STORAGE_TYPE`, `GARAGE_*`, ...) - highest priority
//!
//! Durations accept human-readable values (`5s`, `30m`, `24h`). Secrets
//! (`GARAGE_ACCESS_KEY`, `GARAGE_SECRET_KEY`) are only ever read from the
//! environment, never from a file.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    CleanupConfig, Config, DatabaseConfig, ServerConfig, StorageConfig, StorageKind, WorkerConfig,
};
pub use sources::SourceError;
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] SourceError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path. Useful for tests.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path).map_err(ConfigError::LoadError)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Copy with secrets elided, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.storage.access_key.is_some() {
            copy.storage.access_key = Some("<redacted>".to_string());
        }
        if copy.storage.secret_key.is_some() {
            copy.storage.secret_key = Some("<redacted>".to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[worker]\ncount = 2\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.worker.count, 2);
        assert_eq!(config.server.port, 8081);
    }

    #[test]
    fn test_validation_catches_bad_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[worker]\ncount = 0\n").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path),
            Err(ConfigError::ValidationError(ValidationError::NoWorkers))
        ));
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = Config::default();
        config.storage.access_key = Some("GK_very_secret".to_string());
        config.storage.secret_key = Some("hunter2".to_string());

        let redacted = config.redacted();
        assert_eq!(redacted.storage.access_key.as_deref(), Some("<redacted>"));
        assert_eq!(redacted.storage.secret_key.as_deref(), Some("<redacted>"));
        // The original is untouched.
        assert_eq!(config.storage.secret_key.as_deref(), Some("hunter2"));
    }
}
