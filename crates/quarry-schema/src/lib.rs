//! # quarry-schema
//!
//! Schema introspection, diffing and migration for MySQL tables, built on
//! `quarry-core`.
//!
//! - [`Introspector`] reads live columns, indexes and table status.
//! - [`plan()`] diffs a live [`TableSchema`] against a declared one and
//!   returns the `ALTER TABLE` clauses that reconcile them.
//! - [`Synchronizer`] applies declared schemas: in place through
//!   [`Synchronizer::reconcile`]/[`Synchronizer::compare`], or by rebuilding
//!   the table with its rows through [`Synchronizer::create`].
//!
//! ## Example
//!
//! ```rust
//! use quarry_core::MySqlEscape;
//! use quarry_schema::{plan, ColumnDescriptor, IndexKind, PlanOptions, TableSchema};
//!
//! let live = TableSchema::new(vec![ColumnDescriptor::new("id", "int")])
//!     .index(IndexKind::PrimaryKey, ["id"]);
//! let declared = TableSchema::new(vec![
//!     ColumnDescriptor::new("id", "int"),
//!     ColumnDescriptor::new("email", "varchar(255)").nullable(),
//! ])
//! .index(IndexKind::PrimaryKey, ["id"])
//! .index(IndexKind::Unique, ["email"]);
//!
//! let plan = plan(&live, &declared, PlanOptions::update())?;
//! assert_eq!(
//!     plan.to_sql(&MySqlEscape, "users").as_deref(),
//!     Some("ALTER TABLE `users` ADD COLUMN `email` varchar(255) NULL AFTER `id`, ADD UNIQUE INDEX `email` (`email`)")
//! );
//! # Ok::<(), quarry_schema::SyncError>(())
//! ```

pub mod config;
pub mod ddl;
pub mod error;
pub mod introspect;
pub mod plan;
pub mod schema;
pub mod sync;

pub use config::SyncConfig;
pub use ddl::{AlterOp, Position};
pub use error::{Result, SyncError};
pub use introspect::{Introspector, TableSummary};
pub use plan::{plan, reorder, MigrationPlan, PlanOptions};
pub use schema::{parse_type, ColumnDescriptor, IndexDescriptor, IndexKind, ParsedType, TableSchema};
pub use sync::{SyncMode, SyncOutcome, Synchronizer};
