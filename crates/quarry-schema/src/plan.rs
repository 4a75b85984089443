//! Diffing a declared table against a live one.
//!
//! [`plan`] is a pure function: it never touches the server. Operations
//! come out in a fixed order: column drops, column adds and changes, the
//! primary key, index drops, index adds.

use std::collections::BTreeSet;

use quarry_core::Escape;

use crate::ddl::{alter_table, AlterOp, Position};
use crate::error::{Result, SyncError};
use crate::schema::{IndexKind, TableSchema};

/// What a plan may change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Emit DDL for discrepancies instead of failing.
    pub allow_update: bool,
    /// Drop live columns that are not declared.
    pub allow_destructive: bool,
}

impl PlanOptions {
    /// Compare only.
    #[must_use]
    pub const fn check() -> Self {
        Self {
            allow_update: false,
            allow_destructive: false,
        }
    }

    /// Add and change, never drop columns.
    #[must_use]
    pub const fn update() -> Self {
        Self {
            allow_update: true,
            allow_destructive: false,
        }
    }

    /// Add, change and drop.
    #[must_use]
    pub const fn destructive() -> Self {
        Self {
            allow_update: true,
            allow_destructive: true,
        }
    }
}

/// An ordered list of `ALTER TABLE` clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Clauses in execution order.
    pub ops: Vec<AlterOp>,
}

impl MigrationPlan {
    /// Returns `true` when the live table already matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of clauses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// The combined `ALTER TABLE` statement, `None` for an empty plan.
    #[must_use]
    pub fn to_sql(&self, escape: &dyn Escape, table: &str) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(alter_table(escape, table, &self.ops))
        }
    }
}

fn drift(options: PlanOptions, reason: impl FnOnce() -> String) -> Result<()> {
    if options.allow_update {
        Ok(())
    } else {
        Err(SyncError::Drift(reason()))
    }
}

/// Computes the clauses that turn `live` into `declared`.
///
/// Fails when the tables differ and `options` does not allow the change:
/// a different auto-increment column is never migrated in place, and
/// undeclared live columns are only dropped with `allow_destructive`.
pub fn plan(live: &TableSchema, declared: &TableSchema, options: PlanOptions) -> Result<MigrationPlan> {
    if live.auto_increment != declared.auto_increment {
        return Err(SyncError::AutoIncrementMismatch {
            live: live.auto_increment.clone(),
            declared: declared.auto_increment.clone(),
        });
    }

    let mut ops = Vec::new();

    // ---- Columns ----------------------------------------------------
    for column in &live.columns {
        if declared.column(&column.name).is_some() {
            continue;
        }
        drift(options, || format!("column '{}' is not declared", column.name))?;
        if !options.allow_destructive {
            return Err(SyncError::DestructiveChange(column.name.clone()));
        }
        ops.push(AlterOp::DropColumn(column.name.clone()));
    }

    let mut previous: Option<&str> = None;
    for column in &declared.columns {
        match live.column(&column.name) {
            None => {
                drift(options, || format!("column '{}' is missing", column.name))?;
                if !column.nullable && !column.has_default() {
                    return Err(SyncError::NotNullWithoutDefault(column.name.clone()));
                }
                ops.push(AlterOp::AddColumn {
                    column: column.clone(),
                    position: Position::after(previous),
                });
            }
            Some(live_column) => {
                let differences = column.differences(live_column);
                if !differences.is_empty() {
                    drift(options, || {
                        format!(
                            "column '{}' differs in {}",
                            column.name,
                            differences.join(", ")
                        )
                    })?;
                    ops.push(AlterOp::ChangeColumn {
                        name: column.name.clone(),
                        column: column.clone(),
                        position: None,
                    });
                }
            }
        }
        previous = Some(column.name.as_str());
    }

    // ---- Primary key --------------------------------------------------
    let live_pk = live.primary_key();
    let declared_pk = declared.primary_key();
    if live_pk.map(|pk| pk.column_set()) != declared_pk.map(|pk| pk.column_set()) {
        drift(options, || String::from("primary key differs"))?;
        if live_pk.is_some() {
            ops.push(AlterOp::DropPrimaryKey);
        }
        if let Some(pk) = declared_pk {
            ops.push(AlterOp::AddPrimaryKey(pk.columns.clone()));
        }
    }

    // ---- Secondary indexes ------------------------------------------
    let live_keys: BTreeSet<(IndexKind, String)> =
        live.secondary_indexes().map(|i| (i.kind, i.key())).collect();
    let declared_keys: BTreeSet<(IndexKind, String)> = declared
        .secondary_indexes()
        .map(|i| (i.kind, i.key()))
        .collect();

    for index in live.secondary_indexes() {
        if !declared_keys.contains(&(index.kind, index.key())) {
            drift(options, || format!("index '{}' is not declared", index.name))?;
            ops.push(AlterOp::DropIndex(index.name.clone()));
        }
    }
    for index in declared.secondary_indexes() {
        if !live_keys.contains(&(index.kind, index.key())) {
            drift(options, || format!("index on ({}) is missing", index.key()))?;
            ops.push(AlterOp::AddIndex(index.clone()));
        }
    }

    Ok(MigrationPlan { ops })
}

/// Moves that bring `live_order` into declared column order.
///
/// Each move places one column right after its declared predecessor, so
/// applying them one statement at a time in order yields the declared
/// order. Columns already in place produce no move.
#[must_use]
pub fn reorder(live_order: &[String], declared: &TableSchema) -> Vec<AlterOp> {
    let mut current: Vec<&str> = live_order.iter().map(String::as_str).collect();
    let mut moves = Vec::new();
    let mut previous: Option<&str> = None;

    for (target, column) in declared.columns.iter().enumerate() {
        if let Some(at) = current.iter().position(|name| *name == column.name) {
            if at != target {
                current.remove(at);
                current.insert(target.min(current.len()), &column.name);
                moves.push(AlterOp::ChangeColumn {
                    name: column.name.clone(),
                    column: column.clone(),
                    position: Some(Position::after(previous)),
                });
            }
        }
        previous = Some(column.name.as_str());
    }
    moves
}

#[cfg(test)]
mod tests {
    use quarry_core::MySqlEscape;

    use super::*;
    use crate::schema::{ColumnDescriptor, IndexDescriptor};

    fn users() -> TableSchema {
        TableSchema::new(vec![
            ColumnDescriptor::new("id", "int").auto_increment(),
            ColumnDescriptor::new("name", "varchar(50)").default_value(""),
        ])
        .index(IndexKind::PrimaryKey, ["id"])
    }

    #[test]
    fn test_identical_tables_need_nothing() {
        let plan = plan(&users(), &users(), PlanOptions::check()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.to_sql(&MySqlEscape, "users"), None);
    }

    #[test]
    fn test_auto_increment_mismatch() {
        let mut live = users();
        live.columns[0].auto_increment = false;
        live.auto_increment = None;
        let err = plan(&live, &users(), PlanOptions::destructive()).unwrap_err();
        assert_eq!(
            err,
            SyncError::AutoIncrementMismatch {
                live: None,
                declared: Some(String::from("id")),
            }
        );
    }

    #[test]
    fn test_added_column_goes_after_predecessor() {
        let mut declared = users();
        declared.columns.insert(
            1,
            ColumnDescriptor::new("email", "varchar(255)").nullable(),
        );
        assert!(matches!(
            plan(&users(), &declared, PlanOptions::check()),
            Err(SyncError::Drift(_))
        ));

        let plan = plan(&users(), &declared, PlanOptions::update()).unwrap();
        assert_eq!(
            plan.to_sql(&MySqlEscape, "users").unwrap(),
            "ALTER TABLE `users` ADD COLUMN `email` varchar(255) NULL AFTER `id`"
        );
    }

    #[test]
    fn test_not_null_without_default_is_rejected() {
        let mut declared = users();
        declared
            .columns
            .push(ColumnDescriptor::new("age", "int unsigned"));
        assert_eq!(
            plan(&users(), &declared, PlanOptions::destructive()),
            Err(SyncError::NotNullWithoutDefault(String::from("age")))
        );
    }

    #[test]
    fn test_drop_requires_destructive() {
        let mut live = users();
        live.columns.push(ColumnDescriptor::new("legacy", "text").nullable());

        assert!(matches!(
            plan(&live, &users(), PlanOptions::check()),
            Err(SyncError::Drift(_))
        ));
        assert_eq!(
            plan(&live, &users(), PlanOptions::update()),
            Err(SyncError::DestructiveChange(String::from("legacy")))
        );
        let plan = plan(&live, &users(), PlanOptions::destructive()).unwrap();
        assert_eq!(plan.ops, vec![AlterOp::DropColumn(String::from("legacy"))]);
    }

    #[test]
    fn test_changed_column_keeps_auto_increment() {
        let mut declared = users();
        declared.columns[0] = ColumnDescriptor::new("id", "bigint unsigned").auto_increment();
        let declared = declared.normalized();
        let plan = plan(&users(), &declared, PlanOptions::update()).unwrap();
        assert_eq!(
            plan.to_sql(&MySqlEscape, "users").unwrap(),
            "ALTER TABLE `users` CHANGE `id` `id` bigint unsigned NOT NULL AUTO_INCREMENT"
        );
    }

    #[test]
    fn test_index_diff_ignores_column_order_and_name() {
        let mut live = users();
        live.indexes.push(IndexDescriptor {
            name: String::from("custom_name"),
            kind: IndexKind::Index,
            columns: vec![String::from("name"), String::from("id")],
        });
        let declared = users().index(IndexKind::Index, ["id", "name"]);
        assert!(plan(&live, &declared, PlanOptions::check()).unwrap().is_empty());
    }

    #[test]
    fn test_index_kind_change_drops_then_adds() {
        let live = users().index(IndexKind::Index, ["name"]);
        let declared = users().index(IndexKind::Unique, ["name"]);
        let plan = plan(&live, &declared, PlanOptions::update()).unwrap();
        assert_eq!(
            plan.to_sql(&MySqlEscape, "users").unwrap(),
            "ALTER TABLE `users` DROP INDEX `name`, ADD UNIQUE INDEX `name` (`name`)"
        );
    }

    #[test]
    fn test_primary_key_change() {
        let live = TableSchema::new(vec![
            ColumnDescriptor::new("a", "int"),
            ColumnDescriptor::new("b", "int"),
        ])
        .index(IndexKind::PrimaryKey, ["a"]);
        let declared = TableSchema::new(vec![
            ColumnDescriptor::new("a", "int"),
            ColumnDescriptor::new("b", "int"),
        ])
        .index(IndexKind::PrimaryKey, ["b", "a"]);
        let plan = plan(&live, &declared, PlanOptions::update()).unwrap();
        assert_eq!(
            plan.ops,
            vec![
                AlterOp::DropPrimaryKey,
                AlterOp::AddPrimaryKey(vec![String::from("b"), String::from("a")]),
            ]
        );

        let same_set = TableSchema::new(vec![
            ColumnDescriptor::new("a", "int"),
            ColumnDescriptor::new("b", "int"),
        ])
        .index(IndexKind::PrimaryKey, ["a", "b"]);
        assert!(super::plan(&declared, &same_set, PlanOptions::check())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_operation_order() {
        let mut live = users().index(IndexKind::Index, ["name"]);
        live.columns.push(ColumnDescriptor::new("legacy", "text").nullable());
        let mut declared = users().index(IndexKind::Unique, ["name", "email"]);
        declared
            .columns
            .push(ColumnDescriptor::new("email", "varchar(255)").default_value(""));

        let plan = plan(&live, &declared, PlanOptions::destructive()).unwrap();
        let kinds: Vec<&str> = plan
            .ops
            .iter()
            .map(|op| match op {
                AlterOp::DropColumn(_) => "drop column",
                AlterOp::AddColumn { .. } => "add column",
                AlterOp::ChangeColumn { .. } => "change column",
                AlterOp::DropPrimaryKey | AlterOp::AddPrimaryKey(_) => "primary key",
                AlterOp::DropIndex(_) => "drop index",
                AlterOp::AddIndex(_) => "add index",
            })
            .collect();
        assert_eq!(kinds, vec!["drop column", "add column", "drop index", "add index"]);
    }

    #[test]
    fn test_reorder_moves_only_misplaced_columns() {
        let declared = TableSchema::new(vec![
            ColumnDescriptor::new("a", "int"),
            ColumnDescriptor::new("b", "int"),
            ColumnDescriptor::new("c", "int"),
        ]);
        let live: Vec<String> = ["b", "a", "c"].iter().map(|s| (*s).to_string()).collect();
        let moves = reorder(&live, &declared);
        assert_eq!(moves.len(), 1);
        assert_eq!(
            moves[0].render(&MySqlEscape),
            "CHANGE `a` `a` int NOT NULL FIRST"
        );

        let live: Vec<String> = ["c", "a", "b"].iter().map(|s| (*s).to_string()).collect();
        let moves: Vec<String> = reorder(&live, &declared)
            .iter()
            .map(|op| op.render(&MySqlEscape))
            .collect();
        assert_eq!(
            moves,
            vec![
                "CHANGE `a` `a` int NOT NULL FIRST",
                "CHANGE `b` `b` int NOT NULL AFTER `a`",
            ]
        );

        let live: Vec<String> = ["a", "b", "c"].iter().map(|s| (*s).to_string()).collect();
        assert!(reorder(&live, &declared).is_empty());
    }
}
