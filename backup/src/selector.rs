use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{DownloadError, Result};
use crate::metadata::TableTitle;

/// Compiled `--table` filter.
///
/// The pattern is a comma-separated list of globs matched against
/// `database.table`; an empty pattern matches everything.
pub struct TableFilter {
    set: Option<GlobSet>,
}

impl TableFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let globs: Vec<&str> = pattern
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if globs.is_empty() {
            return Ok(Self { set: None });
        }
        let invalid = |source| DownloadError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        };
        let mut builder = GlobSetBuilder::new();
        for glob in globs {
            builder.add(Glob::new(glob).map_err(invalid)?);
        }
        Ok(Self {
            set: Some(builder.build().map_err(invalid)?),
        })
    }

    pub fn matches(&self, table: &TableTitle) -> bool {
        match &self.set {
            None => true,
            Some(set) => set.is_match(table.full_name()),
        }
    }
}

/// Tables of the backup kept by `pattern`, in catalog order.
pub fn select(tables: &[TableTitle], pattern: &str) -> Result<Vec<TableTitle>> {
    let filter = TableFilter::new(pattern)?;
    Ok(tables.iter().filter(|t| filter.matches(t)).cloned().collect())
}
