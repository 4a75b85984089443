//! Error types for schema synchronization.

use quarry_core::QueryError;

/// Errors raised while comparing or migrating a table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// The table does not exist, so there is nothing to compare.
    #[error("table '{0}' does not exist")]
    MissingTable(String),

    /// The live and declared auto-increment columns differ.
    #[error("auto-increment column differs: live {live:?}, declared {declared:?}")]
    AutoIncrementMismatch {
        /// Live auto-increment column.
        live: Option<String>,
        /// Declared auto-increment column.
        declared: Option<String>,
    },

    /// The live table differs and updates are not allowed.
    #[error("schema drift: {0}")]
    Drift(String),

    /// Reconciling would drop a column and destructive changes are not allowed.
    #[error("column '{0}' would be dropped")]
    DestructiveChange(String),

    /// A NOT NULL column without a default cannot be added to existing rows.
    #[error("column '{0}' is NOT NULL without a default")]
    NotNullWithoutDefault(String),

    /// The declared schema is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Copying rows into the rebuilt table failed.
    #[error("copying rows into '{table}' failed: {source}")]
    CopyFailed {
        /// The temporary table the rows were copied into.
        table: String,
        /// The failing statement's error.
        source: QueryError,
    },

    /// A rebuild was requested inside an open transaction.
    #[error("cannot rebuild '{0}' while a transaction is open")]
    TransactionOpen(String),

    /// A statement failed.
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SyncError>;
