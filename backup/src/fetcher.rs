use clickhouse::table_path_encode;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

use crate::context::OpContext;
use crate::destination::RemoteStorage;
use crate::error::{DownloadError, Result};
use crate::local::backup_root;
use crate::metadata::{TableMetadata, TableTitle};

/// Remote key of a table descriptor.
pub fn remote_table_metadata_path(backup: &str, table: &TableTitle) -> String {
    format!(
        "{backup}/metadata/{}/{}.json",
        table_path_encode(&table.database),
        table_path_encode(&table.table)
    )
}

/// Local mirror of [`remote_table_metadata_path`] under the data root.
pub fn local_table_metadata_path(default_path: &Path, backup: &str, table: &TableTitle) -> PathBuf {
    backup_root(default_path, backup)
        .join("metadata")
        .join(table_path_encode(&table.database))
        .join(format!("{}.json", table_path_encode(&table.table)))
}

/// Fetches, parses and persists one table descriptor.
///
/// Returns the descriptor as read from remote and the bytes written locally.
pub async fn fetch(
    ctx: &OpContext,
    remote: &dyn RemoteStorage,
    default_path: &Path,
    table: &TableTitle,
    schema_only: bool,
) -> Result<(TableMetadata, u64)> {
    let ctx = ctx.with_table(table.full_name());
    let remote_path = remote_table_metadata_path(&ctx.backup, table);
    debug!("{ctx}: {remote_path}");

    let read_error = |source| DownloadError::RemoteRead {
        path: remote_path.clone(),
        source,
    };
    let mut reader = remote.open_reader(&remote_path).await.map_err(read_error)?;
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .await
        .map_err(|e| read_error(e.into()))?;

    let metadata: TableMetadata =
        serde_json::from_slice(&body).map_err(|source| DownloadError::Parse {
            path: remote_path.clone(),
            source,
        })?;

    let local_path = local_table_metadata_path(default_path, &ctx.backup, table);
    let written = metadata
        .save(&local_path, schema_only)
        .map_err(|source| DownloadError::LocalWrite {
            path: local_path.clone(),
            source,
        })?;
    info!("{ctx}: done");
    Ok((metadata, written))
}

/// Fetches every selected table, `concurrency` at a time.
///
/// Results keep the order of `tables`. The first failure stops the remaining
/// fetches and is returned.
pub async fn fetch_all(
    ctx: &OpContext,
    remote: &dyn RemoteStorage,
    default_path: &Path,
    tables: &[TableTitle],
    schema_only: bool,
    concurrency: usize,
) -> Result<(Vec<TableMetadata>, u64)> {
    let fetched: Vec<(TableMetadata, u64)> = stream::iter(tables)
        .map(|table| fetch(ctx, remote, default_path, table, schema_only))
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let metadata_size: u64 = fetched.iter().map(|(_, written)| written).sum();
    Ok((fetched.into_iter().map(|(tm, _)| tm).collect(), metadata_size))
}
