use crate::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents an object (or a directory-like prefix) in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    /// Key (path) of the object, without a trailing `/` for directories
    pub key: String,
    /// Size of the object in bytes, zero for directories
    pub size: u64,
    /// Last modified time
    pub last_modified: Option<DateTime<Utc>>,
    /// Whether this entry is a prefix with children rather than an object
    pub is_dir: bool,
}

impl StorageObject {
    /// Last path component of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Supported storage provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageProviderType {
    /// S3-compatible object store
    #[serde(rename = "s3")]
    S3,
    /// Local or mounted directory
    #[serde(rename = "fs")]
    Fs,
}

impl std::str::FromStr for StorageProviderType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(StorageProviderType::S3),
            "fs" => Ok(StorageProviderType::Fs),
            other => Err(StorageError::Configuration(format!(
                "unsupported remote storage '{other}'"
            ))),
        }
    }
}
