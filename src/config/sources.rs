use super::models::{Config, StorageKind};
use crate::humanize::HumanDuration;
use config::{Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "SLIDEFORGE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/slideforge.toml";
const ENV_PREFIX: &str = "SLIDEFORGE";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {name}: {value} ({reason})")]
    InvalidEnvValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Load configuration from all sources with priority (lowest to highest):
/// 1. Defaults embedded in the structs
/// 2. TOML file (`SLIDEFORGE_CONFIG`, default `config/slideforge.toml`)
/// 3. `SLIDEFORGE__<section>__<key>` environment overrides
/// 4. The flat deployment variables (`PORT`, `DATABASE_URL`, `WORKER_COUNT`, ...)
pub fn load() -> Result<Config, SourceError> {
    // Load .env if present; a missing file is fine.
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    apply_flat_env(&mut config)?;
    Ok(config)
}

/// Load from a specific TOML path plus `SLIDEFORGE__*` overrides.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, SourceError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}

/// Apply the flat variable names the deployment contract documents. These
/// win over everything; secrets are only ever read here.
fn apply_flat_env(config: &mut Config) -> Result<(), SourceError> {
    if let Ok(port) = env::var("PORT") {
        config.server.port = parse("PORT", &port)?;
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }

    if let Ok(kind) = env::var("STORAGE_TYPE") {
        config.storage.kind = match kind.as_str() {
            "filesystem" => StorageKind::Filesystem,
            "garage" | "s3" => StorageKind::Garage,
            other => {
                return Err(SourceError::InvalidEnvValue {
                    name: "STORAGE_TYPE",
                    value: other.to_string(),
                    reason: "expected 'filesystem' or 'garage'".to_string(),
                });
            }
        };
    }
    if let Ok(path) = env::var("STORAGE_PATH") {
        config.storage.path = PathBuf::from(path);
    }
    if let Ok(endpoint) = env::var("GARAGE_ENDPOINT") {
        config.storage.endpoint = Some(endpoint);
    }
    if let Ok(access_key) = env::var("GARAGE_ACCESS_KEY") {
        config.storage.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("GARAGE_SECRET_KEY") {
        config.storage.secret_key = Some(secret_key);
    }
    if let Ok(bucket) = env::var("GARAGE_BUCKET") {
        config.storage.bucket = Some(bucket);
    }
    if let Ok(region) = env::var("GARAGE_REGION") {
        config.storage.region = region;
    }

    if let Ok(count) = env::var("WORKER_COUNT") {
        config.worker.count = parse("WORKER_COUNT", &count)?;
    }
    if let Ok(interval) = env::var("WORKER_POLL_INTERVAL") {
        config.worker.poll_interval = parse_duration("WORKER_POLL_INTERVAL", &interval)?;
    }
    if let Ok(timeout) = env::var("JOB_TIMEOUT") {
        config.worker.job_timeout = parse_duration("JOB_TIMEOUT", &timeout)?;
    }
    if let Ok(base) = env::var("WORKSPACE_BASE") {
        config.worker.workspace_base = PathBuf::from(base);
    }
    if let Ok(command) = env::var("SLIDEV_COMMAND") {
        config.worker.build_command = command;
    }
    if let Ok(cleanup) = env::var("CLEANUP_WORKSPACE") {
        config.worker.cleanup_workspace = match cleanup.as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                return Err(SourceError::InvalidEnvValue {
                    name: "CLEANUP_WORKSPACE",
                    value: other.to_string(),
                    reason: "expected a boolean".to_string(),
                });
            }
        };
    }
    if let Ok(age) = env::var("MAX_WORKSPACE_AGE") {
        config.worker.max_workspace_age = parse_duration("MAX_WORKSPACE_AGE", &age)?;
    }

    if let Ok(interval) = env::var("CLEANUP_INTERVAL") {
        config.cleanup.interval = parse_duration("CLEANUP_INTERVAL", &interval)?;
    }
    if let Ok(age) = env::var("MAX_JOB_AGE") {
        config.cleanup.max_job_age = parse_duration("MAX_JOB_AGE", &age)?;
    }

    Ok(())
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, SourceError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|err: T::Err| SourceError::InvalidEnvValue {
        name,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

fn parse_duration(name: &'static str, value: &str) -> Result<HumanDuration, SourceError> {
    parse::<HumanDuration>(name, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.worker.count, 3);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
port = 9000
max_upload_bytes = "10MB"

[worker]
count = 5
poll_interval = "2s"
job_timeout = "10m"
build_command = "slidev"

[storage]
type = "garage"
bucket = "decks"

[cleanup]
interval = "30m"
max_job_age = "48h"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.server.max_upload_bytes.as_u64(),
            10 * 1024 * 1024
        );
        assert_eq!(config.worker.count, 5);
        assert_eq!(config.worker.poll_interval.as_secs(), 2);
        assert_eq!(config.worker.job_timeout.as_secs(), 600);
        assert_eq!(config.storage.kind, StorageKind::Garage);
        assert_eq!(config.storage.bucket.as_deref(), Some("decks"));
        assert_eq!(config.cleanup.max_job_age.as_secs(), 48 * 3600);
    }

    #[test]
    fn test_flat_env_parse_helpers() {
        assert_eq!(parse::<u16>("PORT", "8082").unwrap(), 8082);
        assert!(parse::<u16>("PORT", "not-a-port").is_err());
        assert_eq!(
            parse_duration("JOB_TIMEOUT", "30m").unwrap().as_secs(),
            1800
        );
        assert!(parse_duration("JOB_TIMEOUT", "soon").is_err());
    }

    // Flat env application is covered via apply_flat_env on a fresh Config
    // rather than process-global env mutation, which is unsafe under the
    // parallel test runner.
    #[test]
    fn test_apply_flat_env_without_vars_is_identity() {
        let mut config = Config::default();
        // None of the deployment variables are set in the test environment;
        // guard the assumption that matters most.
        if env::var("WORKER_COUNT").is_ok() || env::var("PORT").is_ok() {
            return;
        }
        apply_flat_env(&mut config).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.worker.count, 3);
    }
}
