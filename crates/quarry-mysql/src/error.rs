//! Error types for the MySQL driver and the schema file loader.

use std::path::PathBuf;

use quarry_schema::SyncError;

/// Errors raised while connecting or loading declared schemas.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error while connecting.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (runtime start-up, reading schema files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A schema file that does not describe a valid table.
    #[error("Invalid schema file '{path}': {source}")]
    Schema {
        /// Path to the schema file.
        path: PathBuf,
        /// What is wrong with it.
        source: SyncError,
    },
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
