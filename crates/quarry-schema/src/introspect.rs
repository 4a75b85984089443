//! Reading live table metadata.
//!
//! All reads are tolerant: a missing table, or a failing metadata query,
//! yields an empty result and a `warn!` instead of an error.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use quarry_core::{Bindings, Connection, Database, Fragment, QueryError, Row, SqlValue};

use crate::schema::{parse_type, ColumnDescriptor, IndexDescriptor, IndexKind, TableSchema};

/// One line of `SHOW TABLE STATUS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    /// Table name.
    pub name: String,
    /// Storage engine.
    pub engine: Option<String>,
    /// Approximate row count.
    pub rows: Option<u64>,
    /// Next auto-increment value.
    pub auto_increment: Option<u64>,
    /// Table comment.
    pub comment: Option<String>,
}

fn text(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(SqlValue::to_text)
}

fn number(row: &Row, key: &str) -> Option<u64> {
    row.get(key)
        .and_then(SqlValue::as_i64)
        .and_then(|n| u64::try_from(n).ok())
}

/// Parses one row of `SHOW FULL COLUMNS`.
#[must_use]
pub fn column_from_row(row: &Row) -> ColumnDescriptor {
    let parsed = parse_type(&text(row, "Type").unwrap_or_default());
    let extra = text(row, "Extra").unwrap_or_default().to_lowercase();
    ColumnDescriptor {
        name: text(row, "Field").unwrap_or_default(),
        data_type: parsed.base,
        length: parsed.length,
        unsigned: parsed.unsigned,
        collation: text(row, "Collation"),
        default: text(row, "Default"),
        nullable: text(row, "Null").is_some_and(|n| n.eq_ignore_ascii_case("YES")),
        primary: text(row, "Key").is_some_and(|k| k == "PRI"),
        comment: text(row, "Comment").filter(|c| !c.is_empty()),
        auto_increment: extra.contains("auto_increment"),
    }
}

/// Groups the per-column rows of `SHOW INDEX` into indexes.
///
/// Indexes keep the order in which the server lists them; columns follow
/// `Seq_in_index`.
#[must_use]
pub fn indexes_from_rows(rows: &[Row]) -> Vec<IndexDescriptor> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<String, (IndexKind, Vec<(u64, String)>)> = BTreeMap::new();

    for row in rows {
        let Some(name) = text(row, "Key_name") else {
            continue;
        };
        let kind = if name == "PRIMARY" {
            IndexKind::PrimaryKey
        } else if text(row, "Index_type").is_some_and(|t| t.eq_ignore_ascii_case("FULLTEXT")) {
            IndexKind::Fulltext
        } else if number(row, "Non_unique") == Some(0) {
            IndexKind::Unique
        } else {
            IndexKind::Index
        };
        let seq = number(row, "Seq_in_index").unwrap_or(0);
        let column = text(row, "Column_name").unwrap_or_default();

        if !grouped.contains_key(&name) {
            order.push(name.clone());
        }
        grouped
            .entry(name)
            .or_insert_with(|| (kind, Vec::new()))
            .1
            .push((seq, column));
    }

    order
        .into_iter()
        .filter_map(|name| {
            let (kind, mut columns) = grouped.remove(&name)?;
            columns.sort_by_key(|(seq, _)| *seq);
            Some(IndexDescriptor {
                name,
                kind,
                columns: columns.into_iter().map(|(_, c)| c).collect(),
            })
        })
        .collect()
}

/// Read-only metadata queries against a live server.
#[derive(Debug)]
pub struct Introspector<'db, C: Connection> {
    db: &'db Database<C>,
}

impl<'db, C: Connection> Introspector<'db, C> {
    /// Creates an introspector over `db`.
    pub const fn new(db: &'db Database<C>) -> Self {
        Self { db }
    }

    fn show(&self, sql: String) -> Result<Vec<Row>, QueryError> {
        self.db.raw(sql, Bindings::new())?.get()
    }

    /// Returns `true` when `table` exists in the current database.
    pub fn exists(&self, table: &str) -> bool {
        let count = self.db.select(&[]).and_then(|s| {
            s.from("information_schema.TABLES")
                .where_raw(Fragment::new("`TABLE_SCHEMA` = DATABASE()"))
                .and_where("TABLE_NAME", table)
                .count()
        });
        match count {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(table, error = %e, "table existence check failed");
                false
            }
        }
    }

    /// Columns of `table` in table order.
    pub fn columns(&self, table: &str) -> Vec<ColumnDescriptor> {
        let sql = format!("SHOW FULL COLUMNS FROM {}", self.db.quote(table));
        match self.show(sql) {
            Ok(rows) => rows.iter().map(column_from_row).collect(),
            Err(e) => {
                warn!(table, error = %e, "reading columns failed");
                Vec::new()
            }
        }
    }

    /// Indexes of `table`, the primary key included.
    pub fn indexes(&self, table: &str) -> Vec<IndexDescriptor> {
        let sql = format!("SHOW INDEX FROM {}", self.db.quote(table));
        match self.show(sql) {
            Ok(rows) => indexes_from_rows(&rows),
            Err(e) => {
                warn!(table, error = %e, "reading indexes failed");
                Vec::new()
            }
        }
    }

    /// The table comment, `None` when empty.
    pub fn comment(&self, table: &str) -> Option<String> {
        let row = self.db.select(&["TABLE_COMMENT"]).and_then(|s| {
            s.from("information_schema.TABLES")
                .where_raw(Fragment::new("`TABLE_SCHEMA` = DATABASE()"))
                .and_where("TABLE_NAME", table)
                .get_one()
        });
        match row {
            Ok(row) => row
                .and_then(|r| text(&r, "TABLE_COMMENT"))
                .filter(|c| !c.is_empty()),
            Err(e) => {
                warn!(table, error = %e, "reading table comment failed");
                None
            }
        }
    }

    /// Every table of the current database.
    pub fn list_tables(&self) -> Vec<TableSummary> {
        match self.show(String::from("SHOW TABLE STATUS")) {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| {
                    Some(TableSummary {
                        name: text(row, "Name")?,
                        engine: text(row, "Engine"),
                        rows: number(row, "Rows"),
                        auto_increment: number(row, "Auto_increment"),
                        comment: text(row, "Comment").filter(|c| !c.is_empty()),
                    })
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "listing tables failed");
                Vec::new()
            }
        }
    }

    /// The full live schema of `table`, in the declared-schema format.
    ///
    /// A missing table describes as a schema without columns.
    pub fn describe(&self, table: &str) -> TableSchema {
        TableSchema {
            columns: self.columns(table),
            indexes: self.indexes(table),
            auto_increment: None,
            comment: self.comment(table),
        }
        .normalized()
    }
}
