//! # quarry-core
//!
//! A fluent MySQL query builder over a synchronous execution primitive.
//!
//! This crate provides:
//! - A statement builder that assembles SQL text and a positional parameter
//!   list from fluent calls
//! - A condition compiler for WHERE/HAVING clauses with grouping and NULL
//!   handling
//! - A declarative filter translator with relative date periods
//! - Transactions, row locks and table locks
//!
//! Values are never interpolated into executed SQL: every value becomes a
//! `?` placeholder and is bound positionally. Identifiers are backtick-quoted
//! with the connection's escaping rules.
//!
//! ## Example
//!
//! ```rust
//! use quarry_core::{Bindings, Connection, Database, DriverError, Escape, QueryOutput};
//!
//! struct Echo;
//!
//! impl Escape for Echo {}
//!
//! impl Connection for Echo {
//!     fn execute(&mut self, _sql: &str, _params: &Bindings) -> Result<QueryOutput, DriverError> {
//!         Ok(QueryOutput::affected(1))
//!     }
//! }
//!
//! let db = Database::new(Echo);
//! let (sql, params) = db
//!     .select(&["id", "name"])?
//!     .from("users")
//!     .and_where("active", 1)
//!     .or_where("role", "admin")
//!     .order_by("name", "asc")
//!     .limit(10)
//!     .to_sql()?;
//!
//! assert_eq!(
//!     sql,
//!     "SELECT `id`, `name` FROM `users` WHERE `active` = ? OR `role` = ? ORDER BY `name` ASC LIMIT 10"
//! );
//! assert_eq!(params.len(), 2);
//! # Ok::<(), quarry_core::QueryError>(())
//! ```
//!
//! ## Statement lifecycle
//!
//! A statement holds the database's statement slot from its entry point
//! (`select`, `insert`, ...) until it is consumed by a terminal call or
//! dropped. Starting another statement meanwhile fails with
//! [`QueryError::StatementInProgress`], except for a SELECT following an
//! INSERT.

pub mod binder;
pub mod builder;
pub mod condition;
pub mod connection;
pub mod database;
pub mod error;
pub mod filter;
pub mod sink;
pub mod transaction;
pub mod value;

pub use binder::{count_placeholders, Bindings, PLACEHOLDER};
pub use builder::{Direction, ExecOutcome, JoinKind, LockMode, Statement, StatementKind};
pub use condition::{CompareOp, Condition, Conjunction, Fragment, Operand};
pub use connection::{quote_identifier, Connection, Escape, MySqlEscape, QueryOutput};
pub use database::Database;
pub use error::{DriverError, QueryError, Result};
pub use filter::{
    DateFilterConfig, DateFormat, DatePeriod, FieldColumns, FieldFilter, FilterOp,
    FilterTranslator, FilterValue,
};
pub use sink::{ErrorContext, ErrorSink, TracingSink};
pub use transaction::TableLock;
pub use value::{BindType, Row, SqlValue, ToSqlValue};
