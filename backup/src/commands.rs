//! Entry points wired to the configured remote storage and server.

use clickhouse::{ClickHouse, DatabaseControl};
use common::config::BackupConfig;
use std::io::{self, Write};

use crate::destination::{BackupDestination, RemoteStorage};
use crate::download::Downloader;
use crate::error::{DownloadError, Result};
use crate::local::{list_local_backups, print_local_backups};
use crate::locator::print_remote_backups;

/// Downloads `backup_name` from the configured remote storage.
///
/// Fails with [`DownloadError::RemoteDisabled`] before any connection is
/// made when `general.remote_storage` is `none`.
pub async fn download(
    config: &BackupConfig,
    backup_name: &str,
    table_pattern: &str,
    schema_only: bool,
) -> Result<()> {
    let destination = BackupDestination::connect(config).await?;
    let db = ClickHouse::new(&config.clickhouse)?;
    let mut stdout = io::stdout();
    Downloader::new(&destination, &db)
        .with_disk_mapping(config.clickhouse.disk_mapping.clone())
        .with_concurrency(config.general.download_concurrency)
        .run(backup_name, table_pattern, schema_only, &mut stdout)
        .await?;
    Ok(())
}

pub async fn list_remote(config: &BackupConfig, out: &mut (dyn Write + Send)) -> Result<()> {
    let destination = BackupDestination::connect(config).await?;
    let backups = destination.list_backups().await?;
    print_remote_backups(&backups, out).map_err(stdout_error)
}

pub async fn list_local(config: &BackupConfig, out: &mut (dyn Write + Send)) -> Result<()> {
    let db = ClickHouse::new(&config.clickhouse)?;
    db.connect().await?;
    let default_path = db.default_path().await;
    db.close().await;
    let backups = list_local_backups(&default_path?)?;
    print_local_backups(&backups, out).map_err(stdout_error)
}

fn stdout_error(source: io::Error) -> DownloadError {
    DownloadError::LocalWrite {
        path: "<stdout>".into(),
        source,
    }
}
