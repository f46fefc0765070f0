use crate::{ObjectReader, StorageError, StorageObject, StorageProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Storage provider backed by a local (or mounted) directory.
pub struct FsProvider {
    root: PathBuf,
}

impl FsProvider {
    pub fn new(root: &Path) -> Result<Self, StorageError> {
        if root.as_os_str().is_empty() {
            return Err(StorageError::Configuration(
                "fs storage path is not configured".to_string(),
            ));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn resolve(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty() && *s != "..") {
            path.push(segment);
        }
        path
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn object_for(&self, path: &Path, metadata: &std::fs::Metadata) -> Option<StorageObject> {
        Some(StorageObject {
            key: self.key_of(path)?,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            is_dir: metadata.is_dir(),
        })
    }
}

#[async_trait]
impl StorageProvider for FsProvider {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list_objects(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<StorageObject>, StorageError> {
        let dir = self.resolve(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        if recursive {
            for entry in WalkDir::new(&dir).follow_links(false).min_depth(1) {
                let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let metadata = entry.metadata().map_err(|e| StorageError::Io(e.into()))?;
                objects.extend(self.object_for(entry.path(), &metadata));
            }
        } else {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                objects.extend(self.object_for(&entry.path(), &metadata));
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        debug!("Listed {} entries under {}", objects.len(), dir.display());
        Ok(objects)
    }

    async fn open_reader(&self, key: &str) -> Result<ObjectReader, StorageError> {
        let path = self.resolve(key);
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(format!("{} not found", path.display()))
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Box::pin(file))
    }

    async fn download_file(&self, key: &str, destination: &Path) -> Result<(), StorageError> {
        let source = self.resolve(key);
        if !source.is_file() {
            return Err(StorageError::NotFound(format!(
                "{} not found",
                source.display()
            )));
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(StorageError::Io)?;
        }
        tokio::fs::copy(&source, destination)
            .await
            .map_err(StorageError::Io)?;
        Ok(())
    }
}
