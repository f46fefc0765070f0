//! Object storage access for backup downloads.
//!
//! This library provides a small, unified interface over the places a backup
//! can live: S3-compatible object stores (AWS S3, MinIO, Cloudflare R2, GCS
//! interop) and plain directories such as an NFS mount. Providers operate on
//! raw keys; higher layers decide how backups are laid out under them.

pub mod archive;
mod error;
pub mod providers;
mod types;

pub use archive::CompressionFormat;
pub use error::StorageError;
pub use providers::*;
pub use types::*;

use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Reader over the body of a single remote object.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Core storage provider interface.
///
/// Keys are `/`-separated and relative to the provider root (the bucket for
/// S3, the root directory for the filesystem provider).
#[async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    /// Returns the name of the storage provider.
    fn name(&self) -> &str;

    /// Lists objects under `prefix`.
    ///
    /// With `recursive == false` only the direct children of `prefix` are
    /// returned, and "directories" are reported with `is_dir` set.
    async fn list_objects(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<StorageObject>, StorageError>;

    /// Opens a reader over an object's body.
    async fn open_reader(&self, key: &str) -> Result<ObjectReader, StorageError>;

    /// Downloads an object to a file, creating parent directories.
    async fn download_file(&self, key: &str, destination: &Path) -> Result<(), StorageError>;
}

/// Factory for creating storage providers.
pub struct StorageProviderFactory;

impl StorageProviderFactory {
    pub async fn create_s3_provider(
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
        force_path_style: bool,
    ) -> Result<Box<dyn StorageProvider>, StorageError> {
        let provider = providers::aws::S3Provider::new(
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            force_path_style,
        )
        .await?;
        Ok(Box::new(provider))
    }

    pub fn create_fs_provider(root: &Path) -> Result<Box<dyn StorageProvider>, StorageError> {
        Ok(Box::new(providers::fs::FsProvider::new(root)?))
    }
}
