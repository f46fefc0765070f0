use log::{debug, warn};
use std::io::Write;

use crate::context::OpContext;
use crate::destination::{BackupFormat, DataFormat, RemoteBackup, RemoteStorage};
use crate::error::{DownloadError, Result};
use crate::local::LocalBackup;

/// Resolves `ctx.backup` to a usable remote backup.
///
/// An empty name lists what is available to `out` and fails, even when the
/// listing itself cannot be read. A name already
/// present locally fails before the remote catalog is touched.
pub async fn locate(
    ctx: &OpContext,
    local_catalog: &[LocalBackup],
    remote: &dyn RemoteStorage,
    out: &mut (dyn Write + Send),
) -> Result<RemoteBackup> {
    let name = ctx.backup.as_str();
    if name.is_empty() {
        match remote.list_backups().await {
            // best effort, the error below is what the caller acts on
            Ok(backups) => {
                let _ = print_remote_backups(&backups, out);
            }
            Err(e) => warn!("{ctx}: can't list remote backups: {e}"),
        }
        return Err(DownloadError::SelectionRequired);
    }

    if local_catalog.iter().any(|b| b.name == name) {
        return Err(DownloadError::AlreadyExists(name.to_string()));
    }

    let backups = remote.list_backups().await?;
    debug!("{ctx}: {} backups on remote storage", backups.len());
    backups
        .into_iter()
        .find(|b| b.name == name && b.broken.is_none())
        .ok_or_else(|| DownloadError::NotFound(name.to_string()))
}

/// One line per backup: name, size, creation date, format.
pub fn print_remote_backups(
    backups: &[RemoteBackup],
    out: &mut (dyn Write + Send),
) -> std::io::Result<()> {
    for backup in backups {
        let created = backup
            .metadata
            .creation_date
            .map(|d| d.format("%d/%m/%Y %H:%M:%S").to_string())
            .unwrap_or_else(|| "??/??/???? ??:??:??".to_string());
        let kind = match (&backup.broken, backup.format) {
            (Some(reason), _) => format!("broken ({reason})"),
            (None, BackupFormat::Legacy) => "old-format".to_string(),
            (None, BackupFormat::Current(DataFormat::Archive)) => "archive".to_string(),
            (None, BackupFormat::Current(DataFormat::Directory)) => "directory".to_string(),
        };
        writeln!(
            out,
            "{:<40}\t{:>12}\t{}\t{}",
            backup.name,
            format_size(backup.size()),
            created,
            kind
        )?;
    }
    Ok(())
}

pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.2}{}", UNITS[unit])
    }
}
