use clickhouse::Disk;
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::context::OpContext;
use crate::error::{DownloadError, Result};
use crate::metadata::TableMetadata;

/// Logical disk name → local filesystem root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskMapping {
    paths: BTreeMap<String, PathBuf>,
}

impl DiskMapping {
    /// Live disks of the server, with configured entries added or overriding.
    pub fn build(disks: &[Disk], overrides: &BTreeMap<String, String>) -> Self {
        let mut paths: BTreeMap<String, PathBuf> = disks
            .iter()
            .map(|d| (d.name.clone(), PathBuf::from(&d.path)))
            .collect();
        for (name, path) in overrides {
            paths.insert(name.clone(), PathBuf::from(path));
        }
        Self { paths }
    }

    pub fn get(&self, disk: &str) -> Option<&Path> {
        self.paths.get(disk).map(PathBuf::as_path)
    }

    pub(crate) fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Checks that every disk referenced by any of `tables` is mapped.
///
/// Tables are checked in order and disks by name, so the reported disk is
/// deterministic.
pub fn validate(ctx: &OpContext, tables: &[TableMetadata], mapping: &DiskMapping) -> Result<()> {
    for table in tables {
        for disk in table.referenced_disks() {
            if mapping.get(disk).is_none() {
                return Err(DownloadError::UnknownDisk {
                    backup: ctx.backup.clone(),
                    table: table.title().full_name(),
                    disk: disk.to_string(),
                });
            }
        }
    }
    debug!(
        "{ctx}: {} tables resolve against {} disks",
        tables.len(),
        mapping.len()
    );
    Ok(())
}
