use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for one source-bundle upload request.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: ByteSize,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_max_upload_bytes() -> ByteSize {
    ByteSize(50 * 1024 * 1024) // 50 MB
}

/// Relational store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://data/slideforge.db".to_string()
}

/// Blob storage backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Filesystem,
    /// Any S3-compatible object store; named after the on-prem
    /// implementation the service is usually deployed against.
    Garage,
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default, rename = "type")]
    pub kind: StorageKind,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    pub endpoint: Option<String>,
    /// S3 access key (environment only, never from a config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (environment only, never from a config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Filesystem,
            path: default_storage_path(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            bucket: None,
            region: default_region(),
        }
    }
}

fn default_region() -> String {
    "garage".to_string()
}

/// In a container, write under /data; otherwise stay inside the tree.
fn running_in_container() -> bool {
    Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists()
}

fn default_storage_path() -> PathBuf {
    if running_in_container() {
        PathBuf::from("/data/storage")
    } else {
        PathBuf::from("data/storage")
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
    #[serde(default = "default_job_timeout")]
    pub job_timeout: HumanDuration,
    #[serde(default = "default_workspace_base")]
    pub workspace_base: PathBuf,
    #[serde(default = "default_build_command")]
    pub build_command: String,
    #[serde(default = "default_theme")]
    pub default_theme: String,
    #[serde(default = "default_cleanup_workspace")]
    pub cleanup_workspace: bool,
    #[serde(default = "default_max_workspace_age")]
    pub max_workspace_age: HumanDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval: default_poll_interval(),
            job_timeout: default_job_timeout(),
            workspace_base: default_workspace_base(),
            build_command: default_build_command(),
            default_theme: default_theme(),
            cleanup_workspace: default_cleanup_workspace(),
            max_workspace_age: default_max_workspace_age(),
        }
    }
}

fn default_worker_count() -> usize {
    3
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_job_timeout() -> HumanDuration {
    HumanDuration::from_secs(30 * 60)
}

fn default_workspace_base() -> PathBuf {
    if running_in_container() {
        PathBuf::from("/tmp/slideforge/workspaces")
    } else {
        PathBuf::from("data/workspaces")
    }
}

fn default_build_command() -> String {
    "npx @slidev/cli".to_string()
}

fn default_theme() -> String {
    "default".to_string()
}

fn default_cleanup_workspace() -> bool {
    true
}

fn default_max_workspace_age() -> HumanDuration {
    HumanDuration::from_secs(24 * 3600)
}

/// Job retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval: HumanDuration,
    #[serde(default = "default_max_job_age")]
    pub max_job_age: HumanDuration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: default_cleanup_interval(),
            max_job_age: default_max_job_age(),
        }
    }
}

fn default_cleanup_interval() -> HumanDuration {
    HumanDuration::from_secs(3600)
}

fn default_max_job_age() -> HumanDuration {
    HumanDuration::from_secs(24 * 3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.worker.count, 3);
        assert_eq!(config.worker.poll_interval.as_secs(), 5);
        assert_eq!(config.worker.job_timeout.as_secs(), 30 * 60);
        assert_eq!(config.worker.build_command, "npx @slidev/cli");
        assert!(config.worker.cleanup_workspace);
        assert_eq!(config.cleanup.interval.as_secs(), 3600);
        assert_eq!(config.cleanup.max_job_age.as_secs(), 24 * 3600);
        assert_eq!(config.storage.kind, StorageKind::Filesystem);
        assert_eq!(config.storage.region, "garage");
    }

    #[test]
    fn test_bind_addr() {
        let server = ServerConfig::default();
        assert_eq!(server.bind_addr().unwrap().port(), 8081);
    }

    #[test]
    fn test_storage_kind_wire_names() {
        assert_eq!(
            serde_json::from_str::<StorageKind>("\"garage\"").unwrap(),
            StorageKind::Garage
        );
        assert_eq!(
            serde_json::from_str::<StorageKind>("\"filesystem\"").unwrap(),
            StorageKind::Filesystem
        );
    }
}
