use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The folder a node hangs from was never inserted, so the stored tree is broken.
    #[error("Parent folder '{}' not found for '{}'", parent.display(), path.display())]
    Ingestion { path: PathBuf, parent: PathBuf },

    #[error("Scan {0} not found")]
    ScanNotFound(i64),

    #[error("Scan {0} is held by another worker")]
    ScanLocked(i64),

    #[error("Unknown persisted state code {0}")]
    InvalidState(i64),

    /// A fixpoint pass found nothing eligible while unresolved nodes remain.
    #[error("Scan {scan_id}: {remaining} nodes can never be resolved")]
    Unresolvable { scan_id: i64, remaining: i64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Busy/locked database failures that are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
