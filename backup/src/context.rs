use std::fmt;

/// Diagnostic record passed explicitly through every step of an operation.
///
/// Rendered as the prefix of each log line, e.g.
/// `backup=B1 operation=download table=d.t1 disk=default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpContext {
    pub backup: String,
    pub operation: &'static str,
    pub table: Option<String>,
    pub disk: Option<String>,
}

impl OpContext {
    pub fn new(backup: &str, operation: &'static str) -> Self {
        Self {
            backup: backup.to_string(),
            operation,
            table: None,
            disk: None,
        }
    }

    pub fn with_table(&self, table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            disk: None,
            ..self.clone()
        }
    }

    pub fn with_disk(&self, disk: &str) -> Self {
        Self {
            disk: Some(disk.to_string()),
            ..self.clone()
        }
    }
}

impl fmt::Display for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backup={} operation={}", self.backup, self.operation)?;
        if let Some(table) = &self.table {
            write!(f, " table={table}")?;
        }
        if let Some(disk) = &self.disk {
            write!(f, " disk={disk}")?;
        }
        Ok(())
    }
}
