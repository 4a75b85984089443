//! Reconciling live tables with declared schemas.
//!
//! Two strategies:
//! - [`Synchronizer::reconcile`] alters the table in place: one combined
//!   `ALTER TABLE` from the [plan](crate::plan), then one statement per
//!   column move, then the table comment.
//! - [`Synchronizer::create`] builds a fresh table from the declared schema
//!   under a temporary name, copies the rows over inside a transaction and
//!   swaps the tables, keeping the old one as a backup.

use std::fmt;

use chrono::Local;
use tracing::{info, warn};

use quarry_core::{Bindings, Connection, Database, SqlValue};

use crate::config::SyncConfig;
use crate::ddl::{
    alter_table, drop_table, rename_tables, structure_statements, table_comment, truncate_table,
    AlterOp,
};
use crate::error::{Result, SyncError};
use crate::introspect::Introspector;
use crate::plan::{plan, reorder, PlanOptions};
use crate::schema::{ColumnDescriptor, TableSchema};

/// What a synchronization did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The table already matched.
    Unchanged,
    /// The table was altered in place.
    Altered,
    /// The table did not exist and was created.
    Created,
    /// The table was rebuilt and its rows copied.
    Rebuilt {
        /// Name the previous table was kept under, `None` when it was empty
        /// and dropped.
        backup: Option<String>,
        /// Rows copied.
        rows: u64,
    },
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => f.write_str("unchanged"),
            Self::Altered => f.write_str("altered"),
            Self::Created => f.write_str("created"),
            Self::Rebuilt {
                backup: Some(backup),
                rows,
            } => write!(f, "rebuilt, {rows} rows copied, previous table kept as {backup}"),
            Self::Rebuilt { backup: None, .. } => f.write_str("rebuilt"),
        }
    }
}

/// How far [`Synchronizer::ensure`] may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Only compare.
    Check,
    /// Alter in place, never dropping columns.
    Update,
    /// Alter in place, dropping undeclared columns.
    Destructive,
    /// Alter in place, rebuilding the table when that fails.
    Force,
}

/// Value written into a NOT NULL column without a default when a copied
/// row has nothing for it.
#[must_use]
pub fn fallback_value(column: &ColumnDescriptor) -> SqlValue {
    if column.is_numeric() {
        return SqlValue::Int(0);
    }
    let text = match column.data_type.to_lowercase().as_str() {
        "enum" => column
            .length
            .as_deref()
            .and_then(|options| options.split(',').next())
            .map(|first| first.trim().trim_matches('\'').to_string())
            .unwrap_or_default(),
        "json" => String::from("null"),
        "date" => String::from("1970-01-01"),
        "datetime" => String::from("1970-01-01 00:00:00"),
        "timestamp" => String::from("1970-01-01 00:00:01"),
        _ => String::new(),
    };
    SqlValue::Text(text)
}

/// The column values to insert for one copied row.
///
/// Columns the row lacks, or holds NULL for although they are NOT NULL,
/// are left to their declared default, or get NULL or a fallback value
/// when there is none.
#[must_use]
pub fn copy_values(row: &quarry_core::Row, declared: &TableSchema) -> Vec<(String, SqlValue)> {
    let mut values = Vec::with_capacity(declared.columns.len());
    for column in &declared.columns {
        let value = match row.get(&column.name) {
            Some(value) if !value.is_null() || column.nullable => value.clone(),
            _ if column.has_default() => continue,
            _ if column.nullable => SqlValue::Null,
            _ => fallback_value(column),
        };
        values.push((column.name.clone(), value));
    }
    values
}

/// Applies declared schemas to live tables.
pub struct Synchronizer<'db, C: Connection> {
    db: &'db Database<C>,
    config: SyncConfig,
}

impl<C: Connection> fmt::Debug for Synchronizer<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'db, C: Connection> Synchronizer<'db, C> {
    /// Creates a synchronizer with the default configuration.
    pub fn new(db: &'db Database<C>) -> Self {
        Self {
            db,
            config: SyncConfig::default(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// The introspector over the same database.
    #[must_use]
    pub const fn introspector(&self) -> Introspector<'db, C> {
        Introspector::new(self.db)
    }

    fn exec(&self, sql: &str) -> Result<()> {
        self.db.raw(sql, Bindings::new())?.execute()?;
        Ok(())
    }

    fn alter(&self, table: &str, ops: &[AlterOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let sql = self.db.with_escape(|e| alter_table(e, table, ops));
        self.exec(&sql)
    }

    // ================================================================
    // In-place reconciliation
    // ================================================================

    /// Brings `table` in line with `declared` without rebuilding it.
    ///
    /// Fails with [`SyncError::MissingTable`] when the table does not
    /// exist, or with the reason the live table cannot be migrated under
    /// `options`. DDL applied before a failing step stays applied.
    pub fn reconcile(
        &self,
        table: &str,
        declared: &TableSchema,
        options: PlanOptions,
    ) -> Result<SyncOutcome> {
        declared.validate()?;
        let introspector = self.introspector();
        if !introspector.exists(table) {
            return Err(SyncError::MissingTable(table.to_string()));
        }
        let live = introspector.describe(table);
        let plan = plan(&live, declared, options)?;

        let mut changed = false;
        if !plan.is_empty() {
            self.alter(table, &plan.ops)?;
            info!(table, operations = plan.len(), "table altered");
            changed = true;
        }

        let live_order: Vec<String> = if changed {
            introspector
                .columns(table)
                .into_iter()
                .map(|c| c.name)
                .collect()
        } else {
            live.column_names().into_iter().map(String::from).collect()
        };
        let moves = reorder(&live_order, declared);
        if !moves.is_empty() {
            if !options.allow_update {
                return Err(SyncError::Drift(String::from("column order differs")));
            }
            for op in &moves {
                self.alter(table, std::slice::from_ref(op))?;
            }
            info!(table, moved = moves.len(), "columns reordered");
            changed = true;
        }

        if let Some(comment) = &declared.comment {
            if live.comment.as_ref() != Some(comment) {
                if !options.allow_update {
                    return Err(SyncError::Drift(String::from("table comment differs")));
                }
                let sql = self.db.with_escape(|e| table_comment(e, table, comment));
                self.exec(&sql)?;
                changed = true;
            }
        }

        Ok(if changed {
            SyncOutcome::Altered
        } else {
            SyncOutcome::Unchanged
        })
    }

    /// Returns `true` when `table` matches `declared`, or was reconciled to
    /// match it.
    pub fn compare(
        &self,
        table: &str,
        declared: &TableSchema,
        allow_update: bool,
        allow_destructive: bool,
    ) -> bool {
        let options = PlanOptions {
            allow_update,
            allow_destructive,
        };
        match self.reconcile(table, declared, options) {
            Ok(_) => true,
            Err(e) => {
                info!(table, reason = %e, "table does not match its declared schema");
                false
            }
        }
    }

    // ================================================================
    // Rebuild
    // ================================================================

    /// Creates `table` from `declared`, rebuilding it when it exists but
    /// does not match.
    ///
    /// A rebuild creates a temporary table, copies every row into it in one
    /// transaction and swaps it in. The previous table is kept under a
    /// backup name, or dropped when it held no rows. Any failure after the
    /// temporary table exists drops it again and leaves `table` untouched.
    ///
    /// DDL commits implicitly in MySQL, so this fails with
    /// [`SyncError::TransactionOpen`] while a transaction is open.
    pub fn create(&self, table: &str, declared: &TableSchema) -> Result<SyncOutcome> {
        declared.validate()?;
        if self.db.in_transaction() {
            return Err(SyncError::TransactionOpen(table.to_string()));
        }
        let exists = self.introspector().exists(table);
        if exists {
            match self.reconcile(table, declared, PlanOptions::check()) {
                Ok(_) => return Ok(SyncOutcome::Unchanged),
                Err(e) => info!(table, reason = %e, "rebuilding table"),
            }
        }

        let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        let temp = self.config.temp_name(table, &stamp);
        let statements = self
            .db
            .with_escape(|e| structure_statements(e, &temp, declared, &self.config));
        let Some((create, finish)) = statements.split_first() else {
            return Err(SyncError::InvalidSchema(String::from("no columns")));
        };
        self.exec(create)?;

        let result = self.populate(table, &temp, &stamp, finish, exists, declared);
        if result.is_err() {
            self.discard(&temp);
        }
        result
    }

    /// Finishes the temporary table, fills it and swaps it in. The swap is
    /// the last statement, so on error the temporary table is all there is
    /// to clean up.
    fn populate(
        &self,
        table: &str,
        temp: &str,
        stamp: &str,
        finish: &[String],
        exists: bool,
        declared: &TableSchema,
    ) -> Result<SyncOutcome> {
        for sql in finish {
            self.exec(sql)?;
        }

        if !exists {
            self.rename(&[(temp, table)])?;
            info!(table, "table created");
            return Ok(SyncOutcome::Created);
        }

        let rows = self.db.select(&[])?.from(table).get()?;
        let backup = self.config.backup_name(table, stamp);

        if rows.is_empty() {
            self.rename(&[(table, &backup), (temp, table)])?;
            let sql = self.db.with_escape(|e| drop_table(e, &backup));
            if let Err(e) = self.exec(&sql) {
                warn!(table = %backup, error = %e, "dropping empty backup failed");
            }
            info!(table, "empty table rebuilt");
            return Ok(SyncOutcome::Rebuilt {
                backup: None,
                rows: 0,
            });
        }

        let copied = self.copy_rows(&rows, temp, declared)?;
        self.rename(&[(table, &backup), (temp, table)])?;
        info!(table, backup = %backup, rows = copied, "table rebuilt");
        Ok(SyncOutcome::Rebuilt {
            backup: Some(backup),
            rows: copied,
        })
    }

    /// Inserts every row in one transaction, rolling back on failure.
    fn copy_rows(
        &self,
        rows: &[quarry_core::Row],
        temp: &str,
        declared: &TableSchema,
    ) -> Result<u64> {
        self.db.begin()?;
        let copied = rows
            .iter()
            .try_fold(0_u64, |copied, row| {
                self.db
                    .insert(temp)
                    .and_then(|s| s.values(copy_values(row, declared)).execute())
                    .map(|_| copied + 1)
            })
            .and_then(|copied| self.db.commit().map(|()| copied));

        copied.map_err(|source| {
            if self.db.in_transaction() {
                if let Err(e) = self.db.rollback() {
                    warn!(error = %e, "rollback after failed copy failed");
                }
            }
            SyncError::CopyFailed {
                table: temp.to_string(),
                source,
            }
        })
    }

    fn rename(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let sql = self.db.with_escape(|e| rename_tables(e, pairs));
        self.exec(&sql)
    }

    /// Drops a temporary table after a failure, logging rather than
    /// returning errors.
    fn discard(&self, table: &str) {
        let sql = self.db.with_escape(|e| drop_table(e, table));
        if let Err(e) = self.exec(&sql) {
            warn!(table, error = %e, "dropping temporary table failed");
        }
    }

    // ================================================================
    // Entry points
    // ================================================================

    /// Synchronizes `table` according to `mode`.
    ///
    /// Every mode but [`SyncMode::Check`] creates a missing table.
    pub fn ensure(&self, table: &str, declared: &TableSchema, mode: SyncMode) -> Result<SyncOutcome> {
        let options = match mode {
            SyncMode::Check => PlanOptions::check(),
            SyncMode::Update => PlanOptions::update(),
            SyncMode::Destructive | SyncMode::Force => PlanOptions::destructive(),
        };
        match self.reconcile(table, declared, options) {
            Ok(outcome) => Ok(outcome),
            Err(SyncError::MissingTable(_)) if mode != SyncMode::Check => {
                self.create(table, declared)
            }
            Err(e) if mode == SyncMode::Force && !matches!(e, SyncError::InvalidSchema(_)) => {
                warn!(table, reason = %e, "in-place update failed, rebuilding");
                self.create(table, declared)
            }
            Err(e) => Err(e),
        }
    }

    /// Empties `table`.
    pub fn truncate(&self, table: &str) -> Result<()> {
        let sql = self.db.with_escape(|e| truncate_table(e, table));
        self.exec(&sql)
    }

    /// Drops `table`.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        let sql = self.db.with_escape(|e| drop_table(e, table));
        self.exec(&sql)?;
        info!(table, "table dropped");
        Ok(())
    }
}
