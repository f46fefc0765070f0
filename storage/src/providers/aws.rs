use crate::{ObjectReader, StorageError, StorageObject, StorageProvider};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    Aws,
    Minio,
    Cloudflare,
    Gcp,
    Other(String),
}

impl ProviderKind {
    /// Guesses the provider from a custom endpoint.
    pub fn from_endpoint(endpoint: Option<&str>) -> Self {
        match endpoint {
            None => ProviderKind::Aws,
            Some(ep) if ep.contains("amazonaws.com") => ProviderKind::Aws,
            Some(ep) if ep.contains("r2.cloudflarestorage.com") => ProviderKind::Cloudflare,
            Some(ep) if ep.contains("storage.googleapis.com") => ProviderKind::Gcp,
            Some(ep) if ep.contains(":9000") || ep.contains("minio") => ProviderKind::Minio,
            Some(ep) => ProviderKind::Other(ep.to_string()),
        }
    }

    fn needs_path_style(&self) -> bool {
        !matches!(self, ProviderKind::Aws)
    }
}

pub struct S3Provider {
    /// S3 client
    client: Client,
    /// Bucket all keys are resolved against
    bucket: String,
}

impl S3Provider {
    /// Creates a new S3 provider bound to `bucket`
    pub async fn new(
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
        force_path_style: bool,
    ) -> Result<Self, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::Configuration(
                "s3 bucket is not configured".to_string(),
            ));
        }
        let provider_kind = ProviderKind::from_endpoint(endpoint.as_deref());
        let region_str = region.unwrap_or_else(|| "us-east-1".to_string());
        info!("Initializing S3Provider for {provider_kind:?} in {region_str}");

        let mut config_builder = aws_config::defaults(BehaviorVersion::v2025_01_17())
            .region(Region::new(region_str))
            .retry_config(aws_config::retry::RetryConfig::standard().with_max_attempts(3));

        // Add credentials if provided
        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            let credentials = aws_credential_types::Credentials::new(
                access_key, secret_key, None, None, "explicit",
            );
            config_builder =
                config_builder.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        if let Some(ref endpoint) = endpoint {
            info!("Using custom endpoint: {endpoint}");
            config_builder = config_builder.endpoint_url(endpoint);
        }

        let sdk_config = config_builder.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if force_path_style || provider_kind.needs_path_style() {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }
        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self { client, bucket })
    }

    /// Converts one listing page into storage objects
    fn convert_listing(&self, page: &ListObjectsV2Output, out: &mut Vec<StorageObject>) {
        for obj in page.contents() {
            let Some(key) = obj.key() else { continue };
            out.push(StorageObject {
                key: key.to_string(),
                size: obj.size().map(|size| size.try_into().unwrap_or(0)).unwrap_or(0),
                last_modified: obj
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                is_dir: false,
            });
        }
        for prefix in page.common_prefixes() {
            let Some(p) = prefix.prefix() else { continue };
            out.push(StorageObject {
                key: p.trim_end_matches('/').to_string(),
                size: 0,
                last_modified: None,
                is_dir: true,
            });
        }
    }

    /// Helper: create parent directories for a file path
    async fn create_parent_dirs(&self, file_path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create directory {}: {}", parent.display(), e);
                StorageError::Io(e)
            })?;
        }
        Ok(())
    }

    async fn get_object(
        &self,
        key: &str,
    ) -> Result<aws_sdk_s3::operation::get_object::GetObjectOutput, StorageError> {
        let bucket = &self.bucket;
        self.client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if not_found {
                    StorageError::NotFound(format!("Object {bucket}/{key} not found"))
                } else {
                    error!("Failed to get object {bucket}/{key}: {e}");
                    report_s3_error_to_sentry("get_object", &e, bucket, key);
                    StorageError::Aws(e.to_string())
                }
            })
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    fn name(&self) -> &str {
        "S3"
    }

    async fn list_objects(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<StorageObject>, StorageError> {
        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);
            if !recursive {
                request = request.delimiter("/");
            }
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }
            let page = request.send().await.map_err(|e| {
                error!("Failed to list objects in {}/{prefix}: {e}", self.bucket);
                report_s3_error_to_sentry("list_objects_v2", &e, &self.bucket, &prefix);
                StorageError::Aws(e.to_string())
            })?;
            self.convert_listing(&page, &mut objects);
            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        debug!(
            "Listed {} entries under {}/{prefix}",
            objects.len(),
            self.bucket
        );
        Ok(objects)
    }

    async fn open_reader(&self, key: &str) -> Result<ObjectReader, StorageError> {
        let resp = self.get_object(key).await?;
        Ok(Box::pin(resp.body.into_async_read()))
    }

    async fn download_file(&self, key: &str, destination: &Path) -> Result<(), StorageError> {
        let resp = self.get_object(key).await?;

        self.create_parent_dirs(destination).await?;
        let mut file = File::create(destination).await.map_err(StorageError::Io)?;
        let mut stream = resp.body.into_async_read();
        tokio::io::copy(&mut stream, &mut file)
            .await
            .map_err(StorageError::Io)?;
        file.flush().await.map_err(StorageError::Io)?;
        Ok(())
    }
}

fn report_s3_error_to_sentry(
    operation: &str,
    error: &dyn std::error::Error,
    bucket: &str,
    key: &str,
) {
    let mut extra = HashMap::new();
    extra.insert("bucket", bucket);
    extra.insert("key", key);

    let error_message = format!("{operation}: {error}");
    let extra_json = serde_json::to_string(&extra).unwrap_or_default();
    let sentry_message = format!("{error_message} | context: {extra_json}");
    sentry::capture_message(&sentry_message, sentry::Level::Error);
}
