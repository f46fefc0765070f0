use clickhouse::ClickHouseError;
use std::path::PathBuf;
use storage::StorageError;
use thiserror::Error;

/// Coarse classification callers and tests branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Precondition,
    UnsupportedOnLegacyFormat,
    Topology,
    RemoteRead,
    Parse,
    Transfer,
    LocalRead,
    LocalWrite,
    Database,
    Storage,
}

/// What a legacy backup cannot do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyRestriction {
    TableSelection,
    SchemaOnly,
}

impl std::fmt::Display for LegacyRestriction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyRestriction::TableSelection => f.write_str("download of specific tables"),
            LegacyRestriction::SchemaOnly => f.write_str("download of schema only"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("remote storage is 'none'")]
    RemoteDisabled,

    #[error("remote storage: {0}")]
    InvalidRemoteConfig(StorageError),

    #[error("select backup for download")]
    SelectionRequired,

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("'{0}' is not found on remote storage")]
    NotFound(String),

    #[error("invalid table pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("'{backup}' is old format backup and doesn't support {reason}")]
    UnsupportedOnLegacyFormat {
        backup: String,
        reason: LegacyRestriction,
    },

    #[error("table '{table}' requires disk '{disk}' that is not found in clickhouse, you can add nonexistent disks to disk_mapping config")]
    UnknownDisk {
        backup: String,
        table: String,
        disk: String,
    },

    #[error("can't read '{path}' from remote storage: {source}")]
    RemoteRead {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("can't parse '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("can't read {}: {source}", .path.display())]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't write {}: {source}", .path.display())]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download of '{backup}' table '{table}' disk '{disk}' failed: {source}")]
    Transfer {
        backup: String,
        table: String,
        disk: String,
        #[source]
        source: StorageError,
    },

    #[error("download of old format backup '{backup}' failed: {source}")]
    LegacyTransfer {
        backup: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Database(#[from] ClickHouseError),

    #[error("remote storage: {0}")]
    Storage(#[from] StorageError),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::RemoteDisabled | DownloadError::InvalidRemoteConfig(_) => {
                ErrorKind::Configuration
            }
            DownloadError::SelectionRequired
            | DownloadError::AlreadyExists(_)
            | DownloadError::NotFound(_)
            | DownloadError::InvalidPattern { .. } => ErrorKind::Precondition,
            DownloadError::UnsupportedOnLegacyFormat { .. } => {
                ErrorKind::UnsupportedOnLegacyFormat
            }
            DownloadError::UnknownDisk { .. } => ErrorKind::Topology,
            DownloadError::RemoteRead { .. } => ErrorKind::RemoteRead,
            DownloadError::Parse { .. } => ErrorKind::Parse,
            DownloadError::LocalRead { .. } => ErrorKind::LocalRead,
            DownloadError::LocalWrite { .. } => ErrorKind::LocalWrite,
            DownloadError::Transfer { .. } | DownloadError::LegacyTransfer { .. } => {
                ErrorKind::Transfer
            }
            DownloadError::Database(_) => ErrorKind::Database,
            DownloadError::Storage(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
