//! # quarry-mysql
//!
//! A MySQL [`Connection`](quarry_core::Connection) backed by `sqlx`, and
//! helpers for the `quarry` command-line tool.
//!
//! `quarry-core` is synchronous; [`MySqlConnection`] drives its `sqlx`
//! connection on a private current-thread `tokio` runtime, so it must not
//! be used from inside another runtime.

use std::path::Path;

use quarry_schema::TableSchema;

pub mod connection;
pub mod error;

pub use connection::MySqlConnection;
pub use error::{Error, Result};

/// Reads a declared table schema from a JSON file.
pub fn load_schema(path: &Path) -> Result<TableSchema> {
    let json = std::fs::read_to_string(path)?;
    TableSchema::from_json(&json).map_err(|source| Error::Schema {
        path: path.to_path_buf(),
        source,
    })
}
