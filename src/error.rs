use crate::types::TagKeyId;
use thiserror::Error;

/// Error type for tag index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The tag key was never indexed in this shard.
    #[error("Tag key not found: {tag_key_id}")]
    NotFound { tag_key_id: TagKeyId },

    /// The metadata collaborator could not mint or resolve an ID.
    #[error("ID resolution failed: {0}")]
    IdResolution(String),

    #[error("Flush failed: {0}")]
    FlushIo(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {details}")]
    Corruption { details: String },

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Configuration Error: {0}")]
    ConfigError(String),
}

impl IndexError {
    /// Returns true for [`IndexError::NotFound`], which callers usually read as "no matching series".
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound { .. })
    }
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for IndexError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        IndexError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}
