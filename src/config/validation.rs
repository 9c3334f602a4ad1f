use thiserror::Error;

use super::models::{Config, StorageKind};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("worker.count must be at least 1")]
    NoWorkers,

    #[error("worker.build_command must not be empty")]
    EmptyBuildCommand,

    #[error("worker.poll_interval must be greater than zero")]
    ZeroPollInterval,

    #[error("worker.job_timeout must be greater than zero")]
    ZeroJobTimeout,

    #[error("garage storage requires {0} to be set")]
    MissingGarageSetting(&'static str),
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.worker.count == 0 {
        return Err(ValidationError::NoWorkers);
    }
    if config.worker.build_command.trim().is_empty() {
        return Err(ValidationError::EmptyBuildCommand);
    }
    if config.worker.poll_interval.as_duration().is_zero() {
        return Err(ValidationError::ZeroPollInterval);
    }
    if config.worker.job_timeout.as_duration().is_zero() {
        return Err(ValidationError::ZeroJobTimeout);
    }

    if config.storage.kind == StorageKind::Garage {
        let storage = &config.storage;
        if storage.endpoint.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::MissingGarageSetting("GARAGE_ENDPOINT"));
        }
        if storage.access_key.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::MissingGarageSetting("GARAGE_ACCESS_KEY"));
        }
        if storage.secret_key.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::MissingGarageSetting("GARAGE_SECRET_KEY"));
        }
        if storage.bucket.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::MissingGarageSetting("GARAGE_BUCKET"));
        }
    }

    Ok(())
}
