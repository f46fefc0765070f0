use clickhouse::table_path_encode;
use futures::stream::{self, TryStreamExt};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::context::OpContext;
use crate::destination::{DataFormat, RemoteStorage};
use crate::disks::DiskMapping;
use crate::error::{DownloadError, Result};
use crate::local::backup_root;
use crate::metadata::TableMetadata;

/// `<backup>/shadow/<db>/<table>`, the remote root of a table's data.
pub fn remote_shadow_path(backup: &str, table: &TableMetadata) -> String {
    format!(
        "{backup}/shadow/{}/{}",
        table_path_encode(&table.database),
        table_path_encode(&table.table)
    )
}

/// `<disk root>/backup/<backup>/shadow/<db>/<table>/<disk>`
pub fn local_shadow_dir(disk_root: &Path, backup: &str, table: &TableMetadata, disk: &str) -> PathBuf {
    backup_root(disk_root, backup)
        .join("shadow")
        .join(table_path_encode(&table.database))
        .join(table_path_encode(&table.table))
        .join(disk)
}

/// One disk of one table: the unit transfers are scheduled in.
struct DiskTransfer<'a> {
    table: &'a TableMetadata,
    disk: &'a str,
    local_dir: PathBuf,
}

/// Transfers the data of every table that has any, `concurrency` disks at a
/// time, and returns the data size accounted for them.
///
/// Must only be called once every disk of `tables` is known to `mapping`.
pub async fn transfer_all(
    ctx: &OpContext,
    remote: &dyn RemoteStorage,
    format: DataFormat,
    tables: &[TableMetadata],
    mapping: &DiskMapping,
    concurrency: usize,
) -> Result<u64> {
    let mut units = Vec::new();
    let mut data_size = 0;
    for table in tables.iter().filter(|t| !t.metadata_only) {
        data_size += table.total_bytes;
        let disks: Vec<&str> = match format {
            DataFormat::Archive => table.files.keys().map(String::as_str).collect(),
            DataFormat::Directory => table.parts.keys().map(String::as_str).collect(),
        };
        for disk in disks {
            let disk_root = mapping.get(disk).ok_or_else(|| DownloadError::UnknownDisk {
                backup: ctx.backup.clone(),
                table: table.title().full_name(),
                disk: disk.to_string(),
            })?;
            units.push(DiskTransfer {
                table,
                disk,
                local_dir: local_shadow_dir(disk_root, &ctx.backup, table, disk),
            });
        }
    }
    debug!("{ctx}: {} disk transfers scheduled", units.len());

    stream::iter(units.into_iter().map(Ok))
        .try_for_each_concurrent(concurrency.max(1), |unit| transfer_disk(ctx, remote, format, unit))
        .await?;

    info!("{ctx}: data of {} tables downloaded", tables.iter().filter(|t| !t.metadata_only).count());
    Ok(data_size)
}

async fn transfer_disk(
    ctx: &OpContext,
    remote: &dyn RemoteStorage,
    format: DataFormat,
    unit: DiskTransfer<'_>,
) -> Result<()> {
    let table = unit.table;
    let ctx = ctx.with_table(table.title().full_name()).with_disk(unit.disk);
    let transfer_error = |source| DownloadError::Transfer {
        backup: ctx.backup.clone(),
        table: table.title().full_name(),
        disk: unit.disk.to_string(),
        source,
    };
    let shadow = remote_shadow_path(&ctx.backup, table);

    match format {
        DataFormat::Archive => {
            let members = table.files.get(unit.disk).map(Vec::as_slice).unwrap_or_default();
            for member in members {
                let remote_file = format!("{shadow}/{member}");
                debug!("{ctx}: {remote_file}");
                remote
                    .compressed_stream_download(&remote_file, &unit.local_dir)
                    .await
                    .map_err(transfer_error)?;
            }
        }
        DataFormat::Directory => {
            let remote_dir = format!("{shadow}/{}", unit.disk);
            debug!("{ctx}: {remote_dir}");
            remote
                .download_path(&remote_dir, &unit.local_dir)
                .await
                .map_err(transfer_error)?;
        }
    }
    info!("{ctx}: done");
    Ok(())
}
