//! Download of one remote backup into the local data layout.
//!
//! The run is strictly phased: locate the backup, then for current-format
//! backups fetch every table descriptor, validate every referenced disk and
//! only then transfer table data. A legacy backup is a single archive and
//! skips the per-table phases entirely.

use clickhouse::DatabaseControl;
use log::{info, warn};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::context::OpContext;
use crate::descriptor;
use crate::destination::{BackupFormat, DataFormat, RemoteBackup, RemoteStorage};
use crate::disks::{self, DiskMapping};
use crate::error::{DownloadError, ErrorKind, LegacyRestriction, Result};
use crate::fetcher;
use crate::local::{backup_root, list_local_backups};
use crate::locator::locate;
use crate::selector;
use crate::transfer;

pub const OPERATION: &str = "download";

const DEFAULT_CONCURRENCY: usize = 4;

/// What a successful run restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub format: BackupFormat,
    pub tables: usize,
    pub data_size: u64,
    pub metadata_size: u64,
}

pub struct Downloader<'a> {
    remote: &'a dyn RemoteStorage,
    db: &'a dyn DatabaseControl,
    disk_overrides: BTreeMap<String, String>,
    concurrency: usize,
}

impl<'a> Downloader<'a> {
    pub fn new(remote: &'a dyn RemoteStorage, db: &'a dyn DatabaseControl) -> Self {
        Self {
            remote,
            db,
            disk_overrides: BTreeMap::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Disk name → path entries added to, or replacing, the server's disks.
    pub fn with_disk_mapping(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.disk_overrides = overrides;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Downloads `name`, optionally restricted to tables matching `pattern`
    /// or to their schema.
    ///
    /// With an empty `name` the remote backups are listed to `out` and the
    /// run fails without contacting the database.
    pub async fn run(
        &self,
        name: &str,
        pattern: &str,
        schema_only: bool,
        out: &mut (dyn Write + Send),
    ) -> Result<DownloadSummary> {
        let ctx = OpContext::new(name, OPERATION);
        if name.is_empty() {
            locate(&ctx, &[], self.remote, out).await?;
            return Err(DownloadError::SelectionRequired);
        }

        self.db.connect().await?;
        let result = self.run_connected(&ctx, pattern, schema_only, out).await;
        self.db.close().await;
        result
    }

    async fn run_connected(
        &self,
        ctx: &OpContext,
        pattern: &str,
        schema_only: bool,
        out: &mut (dyn Write + Send),
    ) -> Result<DownloadSummary> {
        let default_path = self.db.default_path().await?;
        let local_catalog = list_local_backups(&default_path)?;
        let backup = locate(ctx, &local_catalog, self.remote, out).await?;

        let result = match backup.format {
            BackupFormat::Legacy => {
                self.download_legacy(ctx, &backup, pattern, schema_only, &default_path)
                    .await
            }
            BackupFormat::Current(format) => {
                self.download_current(ctx, &backup, format, pattern, schema_only, &default_path)
                    .await
            }
        };
        match &result {
            // rejected before anything was written
            Err(e) if e.kind() == ErrorKind::UnsupportedOnLegacyFormat => {}
            Err(e) => {
                // nothing written so far is removed
                warn!(
                    "{ctx}: {} may hold a partial download: {e}",
                    backup_root(&default_path, &ctx.backup).display()
                );
            }
            Ok(_) => {}
        }
        result
    }

    async fn download_legacy(
        &self,
        ctx: &OpContext,
        backup: &RemoteBackup,
        pattern: &str,
        schema_only: bool,
        default_path: &Path,
    ) -> Result<DownloadSummary> {
        check_legacy_request(ctx, pattern, schema_only)?;
        let root = backup_root(default_path, &ctx.backup);
        self.remote
            .legacy_download(backup, &root)
            .await
            .map_err(|source| DownloadError::LegacyTransfer {
                backup: ctx.backup.clone(),
                source,
            })?;
        info!("{ctx}: done");
        Ok(DownloadSummary {
            format: BackupFormat::Legacy,
            tables: 0,
            data_size: backup.metadata.data_size,
            metadata_size: 0,
        })
    }

    async fn download_current(
        &self,
        ctx: &OpContext,
        backup: &RemoteBackup,
        format: DataFormat,
        pattern: &str,
        schema_only: bool,
        default_path: &Path,
    ) -> Result<DownloadSummary> {
        let selected = selector::select(&backup.metadata.tables, pattern)?;
        let (tables, metadata_size) = fetcher::fetch_all(
            ctx,
            self.remote,
            default_path,
            &selected,
            schema_only,
            self.concurrency,
        )
        .await?;

        let data_size = if schema_only {
            0
        } else {
            let mapping = DiskMapping::build(&self.db.disks().await?, &self.disk_overrides);
            disks::validate(ctx, &tables, &mapping)?;
            transfer::transfer_all(ctx, self.remote, format, &tables, &mapping, self.concurrency)
                .await?
        };

        let local = descriptor::localize(&backup.metadata, selected, data_size, metadata_size);
        descriptor::write(ctx, default_path, &local)?;
        info!("{ctx}: done");
        Ok(DownloadSummary {
            format: backup.format,
            tables: local.tables.len(),
            data_size,
            metadata_size,
        })
    }
}

/// A legacy backup is one opaque archive: it can only be taken whole.
pub fn check_legacy_request(ctx: &OpContext, pattern: &str, schema_only: bool) -> Result<()> {
    let reason = if !pattern.is_empty() {
        LegacyRestriction::TableSelection
    } else if schema_only {
        LegacyRestriction::SchemaOnly
    } else {
        return Ok(());
    };
    Err(DownloadError::UnsupportedOnLegacyFormat {
        backup: ctx.backup.clone(),
        reason,
    })
}
