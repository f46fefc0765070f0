pub mod commands;
pub mod context;
pub mod descriptor;
pub mod destination;
pub mod disks;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod local;
pub mod locator;
pub mod metadata;
pub mod selector;
pub mod transfer;

pub use commands::{download, list_local, list_remote};
pub use context::OpContext;
pub use destination::{BackupDestination, BackupFormat, DataFormat, RemoteBackup, RemoteStorage};
pub use disks::DiskMapping;
pub use download::{DownloadSummary, Downloader};
pub use error::{DownloadError, ErrorKind, LegacyRestriction, Result};
pub use local::LocalBackup;
pub use metadata::{BackupMetadata, TableMetadata, TableTitle};
