use std::fmt;

/// Error type for storage operations
#[derive(Debug)]
pub enum StorageError {
    /// AWS SDK error
    Aws(String),
    /// Configuration error
    Configuration(String),
    /// I/O error
    Io(std::io::Error),
    /// Object not found
    NotFound(String),
    /// Archive could not be decoded or unpacked
    Archive(String),
    /// Unexpected error
    Unexpected(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Aws(msg) => write!(f, "AWS SDK error: {}", msg),
            StorageError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            StorageError::Io(err) => write!(f, "I/O error: {}", err),
            StorageError::NotFound(msg) => write!(f, "Not found: {}", msg),
            StorageError::Archive(msg) => write!(f, "Archive error: {}", msg),
            StorageError::Unexpected(msg) => write!(f, "Unexpected error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(err.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Unexpected(err.to_string())
    }
}
