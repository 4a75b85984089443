//! Transaction control and table locks.
//!
//! Transaction state belongs to the connection, not to a statement: every
//! statement built on a [`Database`] while a transaction is open runs inside
//! it, and SELECTs default to `FOR UPDATE`.

use tracing::{info, warn};

use crate::binder::Bindings;
use crate::builder::StatementKind;
use crate::connection::Connection;
use crate::database::Database;
use crate::error::{QueryError, Result};

/// Table lock types for `LOCK TABLES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLock {
    /// `READ`
    Read,
    /// `WRITE`
    Write,
}

impl TableLock {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

impl<C: Connection> Database<C> {
    fn control(&self, sql: &str) -> Result<()> {
        self.run(StatementKind::Raw, sql, &Bindings::new())
            .map(|_| ())
    }

    /// Opens a transaction.
    pub fn begin(&self) -> Result<()> {
        if self.in_transaction() {
            return Err(self.fail(QueryError::TransactionActive, None));
        }
        self.control("START TRANSACTION")?;
        self.set_in_transaction(true);
        Ok(())
    }

    /// Commits the open transaction.
    ///
    /// The transaction stays open when COMMIT fails, so it can still be
    /// rolled back.
    pub fn commit(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(self.fail(QueryError::NoTransaction, None));
        }
        self.control("COMMIT")?;
        self.set_in_transaction(false);
        Ok(())
    }

    /// Rolls back the open transaction.
    ///
    /// A failed ROLLBACK leaves the handle in the transaction.
    pub fn rollback(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(self.fail(QueryError::NoTransaction, None));
        }
        self.control("ROLLBACK")?;
        self.set_in_transaction(false);
        Ok(())
    }

    /// Runs `f` inside a transaction: commits on `Ok`, rolls back on `Err`
    /// or when the commit itself fails.
    pub fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<QueryError>,
    {
        self.begin()?;
        let result = f(self);
        let failure = match result {
            Ok(value) => match self.commit() {
                Ok(()) => return Ok(value),
                Err(e) => E::from(e),
            },
            Err(e) => e,
        };
        if let Err(rollback) = self.rollback() {
            warn!(error = %rollback, "rollback failed");
        }
        Err(failure)
    }

    /// Takes table-level locks: `LOCK TABLES a READ, b WRITE`.
    ///
    /// Table locks are independent of transactions.
    pub fn lock_tables(&self, tables: &[(&str, TableLock)]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let list: Vec<String> = tables
            .iter()
            .map(|(table, lock)| format!("{} {}", self.quote(table), lock.as_sql()))
            .collect();
        self.control(&format!("LOCK TABLES {}", list.join(", ")))?;
        info!(tables = tables.len(), "tables locked");
        Ok(())
    }

    /// Releases all table locks held by the connection.
    pub fn unlock_tables(&self) -> Result<()> {
        self.control("UNLOCK TABLES")
    }
}
