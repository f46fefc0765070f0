use chrono::{DateTime, Utc};
use log::debug;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{DownloadError, Result};
use crate::locator::format_size;
use crate::metadata::BackupMetadata;

/// `<data_path>/backup/<name>`
pub fn backup_root(data_path: &Path, name: &str) -> PathBuf {
    data_path.join("backup").join(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBackup {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub data_size: u64,
}

/// Backups already present under `<default_path>/backup/`.
///
/// Any directory counts, whether or not its descriptor is readable: a
/// half-written backup still blocks downloading another one under its name.
pub fn list_local_backups(default_path: &Path) -> Result<Vec<LocalBackup>> {
    let dir = default_path.join("backup");
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No local backups under {}", dir.display());
            return Ok(Vec::new());
        }
        Err(source) => return Err(DownloadError::LocalRead { path: dir, source }),
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DownloadError::LocalRead {
            path: dir.clone(),
            source,
        })?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let descriptor = fs::read(entry.path().join("metadata.json"))
            .ok()
            .and_then(|body| serde_json::from_slice::<BackupMetadata>(&body).ok());
        backups.push(LocalBackup {
            name,
            creation_date: descriptor.as_ref().and_then(|m| m.creation_date),
            data_size: descriptor.as_ref().map(|m| m.data_size).unwrap_or(0),
        });
    }
    backups.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(backups)
}

/// One line per backup: name, size, creation date.
pub fn print_local_backups(
    backups: &[LocalBackup],
    out: &mut (dyn Write + Send),
) -> std::io::Result<()> {
    for backup in backups {
        let created = backup
            .creation_date
            .map(|d| d.format("%d/%m/%Y %H:%M:%S").to_string())
            .unwrap_or_else(|| "??/??/???? ??:??:??".to_string());
        writeln!(
            out,
            "{:<40}\t{:>12}\t{}",
            backup.name,
            format_size(backup.data_size),
            created
        )?;
    }
    Ok(())
}
