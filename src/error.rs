use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;

use crate::types::DriverKind;

#[derive(Debug, Error)]
pub enum StrawDbError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Database driver {0} not found")]
    DriverNotFound(DriverKind),

    #[error("Precondition failed: {0}")]
    PreconditionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Backend error: {0}")]
    BackendError(String),
}

impl StrawDbError {
    /// True when the failure came from the underlying driver rather than the model layer.
    #[must_use]
    pub fn is_backend(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SqliteError(_) => true,
            Self::BackendError(_) => true,
            _ => false,
        }
    }
}

/// Failures raised by a cache gateway.
///
/// These never escape a terminal call: the model treats them as misses and logs them.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}
