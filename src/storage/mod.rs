//! Blob storage abstraction for sources, results, and logs.
//!
//! A single [`BlobStore`] contract with two interchangeable backends:
//! a local filesystem tree for development and an S3-compatible object
//! store (Garage, MinIO, AWS) for deployments. All keys live in one flat
//! namespace with conventional prefixes, see [`paths`].

pub mod fs;
pub mod paths;
pub mod s3;
pub mod service;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use fs::FsBlobStore;
pub use s3::S3BlobStore;
pub use service::StorageService;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing key. `exists` and `delete` never return this.
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend misconfigured: {0}")]
    Configuration(String),

    #[error("invalid file path: {0}")]
    InvalidPath(#[from] paths::PathValidationError),

    /// Key that would escape the backend's namespace.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Key → byte-stream contract implemented by both backends.
///
/// Guarantees shared by all implementations:
/// - `put` overwrites and is atomic with respect to later reads
/// - `get` fails with [`StorageError::NotFound`] for a missing key
/// - `delete` is idempotent, deleting a missing key succeeds
/// - `list` drains every page and returns all keys under the prefix
/// - `presigned_url` yields a URL valid for at least one hour; the
///   filesystem backend returns the logical key instead
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn presigned_url(&self, key: &str) -> Result<String>;
}

/// MIME type for an object key, derived from its extension.
///
/// Fixed table covering the asset types a built slide deck ships; anything
/// else is served as an opaque octet stream.
pub(crate) fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "md" | "markdown" => "text/markdown",
        "css" => mime::TEXT_CSS.as_ref(),
        "js" => "application/javascript",
        "json" => mime::APPLICATION_JSON.as_ref(),
        "html" => mime::TEXT_HTML.as_ref(),
        "png" => mime::IMAGE_PNG.as_ref(),
        "jpg" | "jpeg" => mime::IMAGE_JPEG.as_ref(),
        "gif" => mime::IMAGE_GIF.as_ref(),
        "svg" => mime::IMAGE_SVG.as_ref(),
        "pdf" => mime::APPLICATION_PDF.as_ref(),
        "zip" => "application/zip",
        _ => mime::APPLICATION_OCTET_STREAM.as_ref(),
    }
}
