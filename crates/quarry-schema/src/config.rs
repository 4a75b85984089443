//! Table options and naming used when tables are created or rebuilt.

use serde::{Deserialize, Serialize};

/// Configuration for the schema synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Storage engine for `CREATE TABLE`.
    pub engine: String,
    /// Default character set for `CREATE TABLE`.
    pub charset: String,
    /// Default collation for `CREATE TABLE`.
    pub collation: String,
    /// Marker between the table name and the timestamp of a temporary table.
    pub temp_marker: String,
    /// Marker between the table name and the timestamp of a backup table.
    pub backup_marker: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            engine: String::from("InnoDB"),
            charset: String::from("utf8mb4"),
            collation: String::from("utf8mb4_unicode_ci"),
            temp_marker: String::from("_tmp_"),
            backup_marker: String::from("_backup_"),
        }
    }
}

impl SyncConfig {
    /// Name of the temporary table built for `table` at `stamp`.
    #[must_use]
    pub fn temp_name(&self, table: &str, stamp: &str) -> String {
        format!("{table}{}{stamp}", self.temp_marker)
    }

    /// Name of the backup kept for `table` at `stamp`.
    #[must_use]
    pub fn backup_name(&self, table: &str, stamp: &str) -> String {
        format!("{table}{}{stamp}", self.backup_marker)
    }
}
