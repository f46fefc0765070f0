use log::info;
use std::path::{Path, PathBuf};

use crate::context::OpContext;
use crate::error::{DownloadError, Result};
use crate::local::backup_root;
use crate::metadata::{create_dir_all_restricted, to_tab_json, write_restricted, BackupMetadata, TableTitle};

/// Local copy of the remote descriptor, re-accounted for what was restored.
///
/// The data format is cleared: once downloaded, a backup no longer carries
/// the layout it had on remote storage.
pub fn localize(
    remote: &BackupMetadata,
    tables: Vec<TableTitle>,
    data_size: u64,
    metadata_size: u64,
) -> BackupMetadata {
    BackupMetadata {
        tables,
        data_size,
        metadata_size,
        data_format: String::new(),
        ..remote.clone()
    }
}

pub fn descriptor_path(default_path: &Path, backup: &str) -> PathBuf {
    backup_root(default_path, backup).join("metadata.json")
}

/// Writes `descriptor` to `<default_path>/backup/<name>/metadata.json`.
pub fn write(ctx: &OpContext, default_path: &Path, descriptor: &BackupMetadata) -> Result<()> {
    let path = descriptor_path(default_path, &ctx.backup);
    let write_error = |source| DownloadError::LocalWrite {
        path: path.clone(),
        source,
    };
    let body = to_tab_json(descriptor).map_err(write_error)?;
    if let Some(parent) = path.parent() {
        create_dir_all_restricted(parent).map_err(write_error)?;
    }
    write_restricted(&path, &body).map_err(write_error)?;
    info!(
        "{ctx}: {} tables, data {} bytes, metadata {} bytes",
        descriptor.tables.len(),
        descriptor.data_size,
        descriptor.metadata_size
    );
    Ok(())
}
