pub mod scan;
pub mod walk;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Outcome of a library scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanResult {
    pub added: u64,
    pub skipped: u64,
}
