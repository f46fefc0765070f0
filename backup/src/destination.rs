//! Backups as laid out on remote storage.
//!
//! A current-format backup is a directory `<name>/` holding `metadata.json`,
//! per-table descriptors under `metadata/` and table data under `shadow/`.
//! A legacy backup is a single archive `<name>.<ext>` at the top level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::BackupConfig;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use storage::{
    archive, CompressionFormat, ObjectReader, StorageError, StorageProvider,
    StorageProviderFactory, StorageProviderType,
};
use tokio::io::AsyncReadExt;
use tokio_util::io::SyncIoBridge;

use crate::error::DownloadError;
use crate::metadata::{BackupMetadata, DIRECTORY_FORMAT};

/// Layout of table data inside a current-format backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// Each disk's data split into compressed archive members
    Archive,
    /// Each disk's data stored as a directly downloadable subtree
    Directory,
}

impl DataFormat {
    pub fn from_marker(marker: &str) -> Self {
        if marker == DIRECTORY_FORMAT {
            DataFormat::Directory
        } else {
            DataFormat::Archive
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    /// One opaque archive for the whole backup
    Legacy,
    Current(DataFormat),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBackup {
    pub name: String,
    pub format: BackupFormat,
    pub metadata: BackupMetadata,
    /// Why the backup cannot be used, when its descriptor is unreadable
    pub broken: Option<String>,
    /// Listed key of the whole-backup archive, relative to the backup root
    pub archive: Option<String>,
}

impl RemoteBackup {
    pub fn is_legacy(&self) -> bool {
        self.format == BackupFormat::Legacy
    }

    pub fn size(&self) -> u64 {
        self.metadata.data_size + self.metadata.metadata_size
    }
}

/// Remote side of a download.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Every backup found at the top level, oldest first.
    async fn list_backups(&self) -> Result<Vec<RemoteBackup>, StorageError>;

    /// Opens an object relative to the backup root.
    async fn open_reader(&self, path: &str) -> Result<ObjectReader, StorageError>;

    /// Unpacks one compressed archive into `local_dir`.
    async fn compressed_stream_download(
        &self,
        path: &str,
        local_dir: &Path,
    ) -> Result<(), StorageError>;

    /// Mirrors every object under `path` into `local_dir`.
    async fn download_path(&self, path: &str, local_dir: &Path) -> Result<(), StorageError>;

    /// Unpacks the whole-backup archive of a legacy backup into `local_dir`.
    async fn legacy_download(
        &self,
        backup: &RemoteBackup,
        local_dir: &Path,
    ) -> Result<(), StorageError>;
}

/// [`RemoteStorage`] over a storage provider and an optional key prefix.
pub struct BackupDestination {
    provider: Box<dyn StorageProvider>,
    prefix: String,
    compression: CompressionFormat,
}

impl BackupDestination {
    pub fn new(
        provider: Box<dyn StorageProvider>,
        prefix: &str,
        compression: CompressionFormat,
    ) -> Self {
        Self {
            provider,
            prefix: prefix.trim_matches('/').to_string(),
            compression,
        }
    }

    /// Builds the destination described by `general.remote_storage`.
    pub async fn connect(config: &BackupConfig) -> Result<Self, DownloadError> {
        if !config.remote_storage_enabled() {
            return Err(DownloadError::RemoteDisabled);
        }
        let kind: StorageProviderType = config
            .general
            .remote_storage
            .parse()
            .map_err(DownloadError::InvalidRemoteConfig)?;
        let destination = match kind {
            StorageProviderType::S3 => {
                let s3 = &config.s3;
                let compression = s3
                    .compression_format
                    .parse()
                    .map_err(DownloadError::InvalidRemoteConfig)?;
                let provider = StorageProviderFactory::create_s3_provider(
                    s3.bucket.clone(),
                    s3.region.clone(),
                    s3.endpoint.clone(),
                    s3.access_key.clone(),
                    s3.secret_key.clone(),
                    s3.force_path_style,
                )
                .await
                .map_err(DownloadError::InvalidRemoteConfig)?;
                Self::new(provider, &s3.path, compression)
            }
            StorageProviderType::Fs => {
                let fs = &config.fs;
                let compression = fs
                    .compression_format
                    .parse()
                    .map_err(DownloadError::InvalidRemoteConfig)?;
                let provider = StorageProviderFactory::create_fs_provider(Path::new(&fs.path))
                    .map_err(DownloadError::InvalidRemoteConfig)?;
                Self::new(provider, "", compression)
            }
        };
        info!(
            "Using {} remote storage{}",
            destination.provider.name(),
            if destination.prefix.is_empty() {
                String::new()
            } else {
                format!(" under '{}'", destination.prefix)
            }
        );
        Ok(destination)
    }

    fn key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    async fn read_descriptor(&self, name: &str) -> Result<BackupMetadata, String> {
        let path = format!("{name}/metadata.json");
        let mut reader = self
            .provider
            .open_reader(&self.key(&path))
            .await
            .map_err(|e| e.to_string())?;
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::from_slice(&body).map_err(|e| format!("can't parse {path}: {e}"))
    }
}

#[async_trait]
impl RemoteStorage for BackupDestination {
    async fn list_backups(&self) -> Result<Vec<RemoteBackup>, StorageError> {
        let entries = self.provider.list_objects(&self.key(""), false).await?;
        let mut backups = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.file_name().to_string();
            if entry.is_dir {
                match self.read_descriptor(&name).await {
                    Ok(metadata) => backups.push(RemoteBackup {
                        name,
                        format: BackupFormat::Current(DataFormat::from_marker(
                            &metadata.data_format,
                        )),
                        metadata,
                        broken: None,
                        archive: None,
                    }),
                    Err(reason) => {
                        warn!("Remote backup '{name}' is broken: {reason}");
                        backups.push(RemoteBackup {
                            metadata: BackupMetadata {
                                backup_name: name.clone(),
                                ..Default::default()
                            },
                            name,
                            format: BackupFormat::Current(DataFormat::Archive),
                            broken: Some(reason),
                            archive: None,
                        });
                    }
                }
            } else if let Some(stem) = CompressionFormat::strip_extension(&name) {
                backups.push(legacy_backup(stem, &name, entry.size, entry.last_modified));
            } else {
                debug!("Skipping unrelated remote object '{}'", entry.key);
            }
        }
        backups.sort_by(|a, b| {
            a.metadata
                .creation_date
                .cmp(&b.metadata.creation_date)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(backups)
    }

    async fn open_reader(&self, path: &str) -> Result<ObjectReader, StorageError> {
        self.provider.open_reader(&self.key(path)).await
    }

    async fn compressed_stream_download(
        &self,
        path: &str,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        let format = CompressionFormat::detect(path).unwrap_or(self.compression);
        debug!("Downloading {format} stream {path} into {}", local_dir.display());
        let reader = SyncIoBridge::new(self.open_reader(path).await?);
        let destination = local_dir.to_path_buf();
        tokio::task::spawn_blocking(move || archive::unpack(reader, format, &destination))
            .await?
    }

    async fn download_path(&self, path: &str, local_dir: &Path) -> Result<(), StorageError> {
        let root = self.key(path);
        let objects = self.provider.list_objects(&root, true).await?;
        debug!(
            "Downloading {} objects from {path} into {}",
            objects.len(),
            local_dir.display()
        );
        for object in objects {
            let destination = mirror_path(local_dir, &root, &object.key)?;
            self.provider.download_file(&object.key, &destination).await?;
        }
        Ok(())
    }

    async fn legacy_download(
        &self,
        backup: &RemoteBackup,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        let path = backup
            .archive
            .clone()
            .unwrap_or_else(|| format!("{}.{}", backup.name, self.compression.extension()));
        self.compressed_stream_download(&path, local_dir).await
    }
}

fn legacy_backup(
    name: &str,
    archive: &str,
    size: u64,
    modified: Option<DateTime<Utc>>,
) -> RemoteBackup {
    RemoteBackup {
        name: name.to_string(),
        format: BackupFormat::Legacy,
        metadata: BackupMetadata {
            backup_name: name.to_string(),
            creation_date: modified,
            data_size: size,
            ..Default::default()
        },
        broken: None,
        archive: Some(archive.to_string()),
    }
}

/// Local path mirroring `key` under `local_dir`, relative to `root`.
fn mirror_path(local_dir: &Path, root: &str, key: &str) -> Result<PathBuf, StorageError> {
    let rel = key
        .strip_prefix(root)
        .map(|rel| rel.trim_start_matches('/'))
        .ok_or_else(|| {
            StorageError::Unexpected(format!("object '{key}' is outside of '{root}'"))
        })?;
    let mut path = local_dir.to_path_buf();
    for segment in rel.split('/').filter(|s| !s.is_empty() && *s != "..") {
        path.push(segment);
    }
    Ok(path)
}
