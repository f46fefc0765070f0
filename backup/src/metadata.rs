//! Backup and table descriptors as stored next to the data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// `data_format` value marking per-table directory layouts.
pub const DIRECTORY_FORMAT: &str = "directory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTitle {
    pub database: String,
    pub table: String,
}

impl TableTitle {
    pub fn new(database: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
        }
    }

    /// `database.table`, the name patterns are matched against.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMeta {
    pub name: String,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMeta {
    pub name: String,
    #[serde(default)]
    pub create_query: String,
}

/// Backup-level descriptor (`<name>/metadata.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub disks: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub clickhouse_version: String,
    #[serde(default)]
    pub data_size: u64,
    #[serde(default)]
    pub metadata_size: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub compressed_size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<DatabaseMeta>,
    #[serde(default)]
    pub tables: Vec<TableTitle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionMeta>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_format: String,
    /// Fields carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub name: String,
    /// Checksums, partition id and the like, carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Per-table descriptor (`<name>/metadata/<db>/<table>.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Archive mode: disk → archive members, in upload order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, Vec<String>>,
    pub table: String,
    pub database: String,
    /// Directory mode: disk → parts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parts: BTreeMap<String, Vec<Part>>,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub size: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dependencies_table: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dependencies_database: String,
    #[serde(default)]
    pub metadata_only: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TableMetadata {
    pub fn title(&self) -> TableTitle {
        TableTitle::new(&self.database, &self.table)
    }

    /// Every disk named by either the archive or the part mapping.
    pub fn referenced_disks(&self) -> impl Iterator<Item = &str> {
        let mut disks: Vec<&str> = self
            .files
            .keys()
            .chain(self.parts.keys())
            .map(String::as_str)
            .collect();
        disks.sort_unstable();
        disks.dedup();
        disks.into_iter()
    }

    /// The document persisted for a schema-only restore: identity, DDL and
    /// dependencies, no data layout or sizes.
    pub fn schema_only(&self) -> TableMetadata {
        TableMetadata {
            table: self.table.clone(),
            database: self.database.clone(),
            query: self.query.clone(),
            uuid: self.uuid.clone(),
            dependencies_table: self.dependencies_table.clone(),
            dependencies_database: self.dependencies_database.clone(),
            metadata_only: true,
            ..Default::default()
        }
    }

    /// Writes the descriptor to `location`, returning the bytes written.
    pub fn save(&self, location: &Path, schema_only: bool) -> io::Result<u64> {
        let body = if schema_only {
            to_tab_json(&self.schema_only())?
        } else {
            to_tab_json(self)?
        };
        if let Some(parent) = location.parent() {
            create_dir_all_restricted(parent)?;
        }
        write_restricted(location, &body)?;
        Ok(body.len() as u64)
    }
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Serializes with tab indentation, the layout the server-side tooling writes.
pub fn to_tab_json<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    value.serialize(&mut serializer).map_err(io::Error::other)?;
    Ok(body)
}

pub(crate) fn create_dir_all_restricted(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder.create(dir)
}

/// Writes `body` readable by owner and group only.
pub(crate) fn write_restricted(path: &Path, body: &[u8]) -> io::Result<()> {
    fs::write(path, body)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(0o640);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}
