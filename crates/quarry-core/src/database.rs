//! The database handle: statement entry points, execution and error
//! recording.

use std::cell::{Cell, RefCell};
use std::fmt;

use tracing::debug;

use crate::binder::Bindings;
use crate::builder::{Statement, StatementKind};
use crate::condition::Fragment;
use crate::connection::{quote_identifier, Connection, Escape, QueryOutput};
use crate::error::{QueryError, Result};
use crate::sink::{ErrorContext, ErrorSink, TracingSink};

/// A connection wrapped with statement bookkeeping.
///
/// All methods take `&self`; interior mutability tracks the open statement,
/// the transaction flag and the last error. A `Database` is meant to be used
/// from one thread at a time.
pub struct Database<C: Connection> {
    conn: RefCell<C>,
    sink: Box<dyn ErrorSink>,
    active: RefCell<Vec<StatementKind>>,
    in_transaction: Cell<bool>,
    last_error: RefCell<Option<String>>,
    last_insert_id: Cell<u64>,
}

impl<C: Connection> fmt::Debug for Database<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("active", &self.active.borrow())
            .field("in_transaction", &self.in_transaction.get())
            .field("last_insert_id", &self.last_insert_id.get())
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Database<C> {
    /// Wraps a connection, reporting errors through [`TracingSink`].
    pub fn new(conn: C) -> Self {
        Self {
            conn: RefCell::new(conn),
            sink: Box::new(TracingSink),
            active: RefCell::new(Vec::new()),
            in_transaction: Cell::new(false),
            last_error: RefCell::new(None),
            last_insert_id: Cell::new(0),
        }
    }

    /// Replaces the error sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Returns the wrapped connection.
    pub fn into_inner(self) -> C {
        self.conn.into_inner()
    }

    // ========================================================================
    // Statement entry points
    // ========================================================================

    /// Starts a SELECT. An empty column list selects `*`.
    pub fn select(&self, columns: &[&str]) -> Result<Statement<'_, C>> {
        Ok(self.start(StatementKind::Select)?.with_columns(columns))
    }

    /// Starts an INSERT into `table`.
    pub fn insert(&self, table: &str) -> Result<Statement<'_, C>> {
        Ok(self.start(StatementKind::Insert)?.with_table(table))
    }

    /// Starts a REPLACE into `table`.
    pub fn replace(&self, table: &str) -> Result<Statement<'_, C>> {
        Ok(self.start(StatementKind::Replace)?.with_table(table))
    }

    /// Starts an UPDATE of `table`.
    pub fn update(&self, table: &str) -> Result<Statement<'_, C>> {
        Ok(self.start(StatementKind::Update)?.with_table(table))
    }

    /// Starts a DELETE from `table`.
    pub fn delete(&self, table: &str) -> Result<Statement<'_, C>> {
        Ok(self.start(StatementKind::Delete)?.with_table(table))
    }

    /// Starts a hand-written statement with positional bindings.
    pub fn raw(&self, sql: impl Into<String>, bindings: Bindings) -> Result<Statement<'_, C>> {
        Ok(self
            .start(StatementKind::Raw)?
            .with_raw(Fragment::with_bindings(sql, bindings)))
    }

    fn start(&self, kind: StatementKind) -> Result<Statement<'_, C>> {
        let current = self.active.borrow().last().copied();
        match current {
            None => {}
            Some(StatementKind::Insert) if kind == StatementKind::Select => {}
            Some(active) => {
                let err = QueryError::StatementInProgress {
                    active,
                    requested: kind,
                };
                return Err(self.fail(err, None));
            }
        }
        self.active.borrow_mut().push(kind);
        Ok(Statement::new(self, kind))
    }

    pub(crate) fn release(&self, kind: StatementKind) {
        let mut active = self.active.borrow_mut();
        if let Some(pos) = active.iter().rposition(|k| *k == kind) {
            active.remove(pos);
        }
    }

    /// Returns `true` while a statement is in progress.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.active.borrow().is_empty()
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Returns `true` inside `begin()` ... `commit()`/`rollback()`.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    pub(crate) fn set_in_transaction(&self, value: bool) {
        self.in_transaction.set(value);
    }

    /// The most recent recorded error, falling back to the connection's own.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .borrow()
            .clone()
            .or_else(|| self.conn.borrow().last_error())
    }

    /// The id generated by the most recent INSERT, 0 before any.
    #[must_use]
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id.get()
    }

    /// Backtick-quotes an identifier with the connection's escaping rules.
    #[must_use]
    pub fn quote(&self, name: &str) -> String {
        self.with_escape(|escape| quote_identifier(escape, name))
    }

    /// Runs `f` with the connection's escaping rules, e.g. to render DDL.
    pub fn with_escape<R>(&self, f: impl FnOnce(&dyn Escape) -> R) -> R {
        let conn = self.conn.borrow();
        f(&*conn)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Records an error as the last error and reports it to the sink.
    pub(crate) fn fail(&self, err: QueryError, sql: Option<String>) -> QueryError {
        let (sql, original_error) = match &err {
            QueryError::Execution { message, sql: failed } => {
                (sql.or_else(|| Some(failed.clone())), Some(message.clone()))
            }
            _ => (sql, None),
        };
        let message = err.to_string();
        self.sink.report(
            err.kind(),
            &message,
            &ErrorContext {
                sql,
                original_error,
            },
        );
        *self.last_error.borrow_mut() = Some(message);
        err
    }

    /// Sends one statement through the connection.
    pub(crate) fn run(
        &self,
        kind: StatementKind,
        sql: &str,
        bindings: &Bindings,
    ) -> Result<QueryOutput> {
        let rendered = self.with_escape(|escape| bindings.render_debug_sql(sql, escape));
        debug!(kind = %kind, sql = %rendered, "executing statement");

        let result = self.conn.borrow_mut().execute(sql, bindings);
        match result {
            Ok(out) => {
                debug!(
                    affected_rows = out.affected_rows,
                    rows = out.rows.len(),
                    "statement finished"
                );
                if kind == StatementKind::Insert {
                    self.last_insert_id.set(out.insert_id);
                }
                Ok(out)
            }
            Err(e) => {
                let err = QueryError::Execution {
                    message: e.message,
                    sql: rendered,
                };
                Err(self.fail(err, None))
            }
        }
    }
}
