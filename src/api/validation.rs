//! Request-level validation, ahead of the domain services.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("callback_url must be an http or https URL")]
    InvalidCallbackUrl,

    #[error("callback_url exceeds 2048 characters")]
    CallbackUrlTooLong,

    #[error("uploaded part is missing a file name")]
    MissingFileName,
}

pub fn validate_callback_url(url: &str) -> Result<(), RequestValidationError> {
    if url.len() > 2048 {
        return Err(RequestValidationError::CallbackUrlTooLong);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(RequestValidationError::InvalidCallbackUrl);
    }
    Ok(())
}

/// Normalize a multipart file name into the workspace-relative form the
/// storage path rules expect: forward slashes, no leading `./`.
pub fn normalize_upload_path(raw: &str) -> Result<String, RequestValidationError> {
    if raw.is_empty() {
        return Err(RequestValidationError::MissingFileName);
    }
    let mut path = raw.replace('\\', "/");
    while let Some(stripped) = path.strip_prefix("./") {
        path = stripped.to_string();
    }
    if path.is_empty() {
        return Err(RequestValidationError::MissingFileName);
    }
    Ok(path)
}
