//! S3-compatible blob backend (Garage, MinIO, AWS).
//!
//! Path-style addressing is forced because on-prem S3 implementations do
//! not serve virtual-hosted bucket names. The bucket is probed at startup
//! and created when absent.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

use super::{BlobStore, Result, StorageError, content_type_for};

const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

impl S3Settings {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("endpoint", &self.endpoint),
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
            ("bucket", &self.bucket),
        ] {
            if value.is_empty() {
                return Err(StorageError::Configuration(format!(
                    "s3 {} must not be empty",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Build the client and make sure the bucket exists.
    pub async fn connect(settings: S3Settings) -> Result<Self> {
        settings.validate()?;

        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "slideforge",
        );

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let store = Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
        };
        store.ensure_bucket().await?;

        info!(
            endpoint = %settings.endpoint,
            bucket = %settings.bucket,
            "S3 blob store ready"
        );
        Ok(store)
    }

    async fn ensure_bucket(&self) -> Result<()> {
        let head = self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await;

        if head.is_ok() {
            return Ok(());
        }

        debug!(bucket = %self.bucket, "Bucket probe failed, attempting creation");
        match self
            .client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => {
                info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_bucket_already_owned_by_you()
                    || service_err.is_bucket_already_exists()
                {
                    return Ok(());
                }
                Err(StorageError::Configuration(format!(
                    "bucket '{}' is unavailable and could not be created: {}",
                    self.bucket, service_err
                )))
            }
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(key))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;

        debug!(key, size, "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(service_err.to_string())
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(service_err.to_string()))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 DeleteObject already succeeds for a missing key.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        // Drain every page; a single response is capped at 1000 keys.
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|err| StorageError::Backend(err.to_string()))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn presigned_url(&self, key: &str) -> Result<String> {
        let presigning = PresigningConfig::expires_in(PRESIGN_EXPIRY)
            .map_err(|err| StorageError::Backend(err.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;

        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            endpoint: "http://127.0.0.1:3900".to_string(),
            access_key: "GK_test".to_string(),
            secret_key: "secret".to_string(),
            bucket: "slideforge".to_string(),
            region: "garage".to_string(),
        }
    }

    #[test]
    fn test_settings_validation() {
        assert!(settings().validate().is_ok());

        let mut missing_endpoint = settings();
        missing_endpoint.endpoint = String::new();
        assert!(matches!(
            missing_endpoint.validate(),
            Err(StorageError::Configuration(_))
        ));

        let mut missing_bucket = settings();
        missing_bucket.bucket = String::new();
        assert!(missing_bucket.validate().is_err());
    }
}
