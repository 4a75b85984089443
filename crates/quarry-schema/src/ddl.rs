//! MySQL DDL rendering.
//!
//! Every function here is pure: it takes the connection's escaping rules
//! and returns statement text. Nothing is executed.

use quarry_core::{quote_identifier, Escape};

use crate::config::SyncConfig;
use crate::schema::{ColumnDescriptor, IndexDescriptor, IndexKind, TableSchema};

/// Where an added or changed column goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// First column of the table.
    First,
    /// Right after the named column.
    After(String),
}

impl Position {
    /// Position of the column that follows `previous` in declared order.
    #[must_use]
    pub fn after(previous: Option<&str>) -> Self {
        previous.map_or(Self::First, |name| Self::After(name.to_string()))
    }

    fn render(&self, escape: &dyn Escape) -> String {
        match self {
            Self::First => String::from("FIRST"),
            Self::After(name) => format!("AFTER {}", quote_identifier(escape, name)),
        }
    }
}

/// One clause of an `ALTER TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterOp {
    /// `ADD COLUMN`.
    AddColumn {
        /// The new column.
        column: ColumnDescriptor,
        /// Where it goes.
        position: Position,
    },
    /// `CHANGE` an existing column's definition, optionally moving it.
    ChangeColumn {
        /// Current column name.
        name: String,
        /// New definition.
        column: ColumnDescriptor,
        /// New position, if the column moves.
        position: Option<Position>,
    },
    /// `DROP COLUMN`.
    DropColumn(String),
    /// `DROP PRIMARY KEY`.
    DropPrimaryKey,
    /// `ADD PRIMARY KEY` over the columns in order.
    AddPrimaryKey(Vec<String>),
    /// `DROP INDEX` by name.
    DropIndex(String),
    /// `ADD UNIQUE|FULLTEXT INDEX`, or a plain index.
    AddIndex(IndexDescriptor),
}

impl AlterOp {
    /// Renders the clause without the `ALTER TABLE` prefix.
    #[must_use]
    pub fn render(&self, escape: &dyn Escape) -> String {
        match self {
            Self::AddColumn { column, position } => format!(
                "ADD COLUMN {} {}",
                column_definition(escape, column, column.auto_increment),
                position.render(escape)
            ),
            Self::ChangeColumn {
                name,
                column,
                position,
            } => {
                let mut out = format!(
                    "CHANGE {} {}",
                    quote_identifier(escape, name),
                    column_definition(escape, column, column.auto_increment)
                );
                if let Some(position) = position {
                    out.push(' ');
                    out.push_str(&position.render(escape));
                }
                out
            }
            Self::DropColumn(name) => format!("DROP COLUMN {}", quote_identifier(escape, name)),
            Self::DropPrimaryKey => String::from("DROP PRIMARY KEY"),
            Self::AddPrimaryKey(columns) => {
                format!("ADD PRIMARY KEY ({})", column_list(escape, columns))
            }
            Self::DropIndex(name) => format!("DROP INDEX {}", quote_identifier(escape, name)),
            Self::AddIndex(index) => match index.kind {
                IndexKind::PrimaryKey => {
                    format!("ADD PRIMARY KEY ({})", column_list(escape, &index.columns))
                }
                kind => format!(
                    "ADD {} {} ({})",
                    kind.as_sql(),
                    quote_identifier(escape, &index.name),
                    column_list(escape, &index.columns)
                ),
            },
        }
    }

    /// Returns `true` for operations that discard data or structure.
    #[must_use]
    pub const fn is_destructive(&self) -> bool {
        matches!(self, Self::DropColumn(_))
    }
}

fn column_list(escape: &dyn Escape, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(escape, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn literal(escape: &dyn Escape, value: &str) -> String {
    format!("'{}'", escape.escape_literal(value))
}

fn is_timestamp_keyword(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "current_timestamp" | "current_timestamp()" | "now()"
    )
}

/// Renders one column definition: name, type, collation, nullability,
/// default and comment.
///
/// `AUTO_INCREMENT` is only emitted when `with_auto_increment` is set; a
/// fresh table gets it after its primary key exists.
#[must_use]
pub fn column_definition(
    escape: &dyn Escape,
    column: &ColumnDescriptor,
    with_auto_increment: bool,
) -> String {
    let mut out = format!(
        "{} {}",
        quote_identifier(escape, &column.name),
        column.column_type()
    );
    if let Some(collation) = &column.collation {
        out.push_str(" COLLATE ");
        out.push_str(collation);
    }
    out.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if let Some(default) = &column.default {
        out.push_str(" DEFAULT ");
        if is_timestamp_keyword(default) {
            out.push_str("CURRENT_TIMESTAMP");
        } else {
            out.push_str(&literal(escape, default));
        }
    }
    if with_auto_increment && column.auto_increment {
        out.push_str(" AUTO_INCREMENT");
    }
    if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
        out.push_str(" COMMENT ");
        out.push_str(&literal(escape, comment));
    }
    out
}

/// `ALTER TABLE t op, op, ...`
#[must_use]
pub fn alter_table(escape: &dyn Escape, table: &str, ops: &[AlterOp]) -> String {
    let clauses: Vec<String> = ops.iter().map(|op| op.render(escape)).collect();
    format!(
        "ALTER TABLE {} {}",
        quote_identifier(escape, table),
        clauses.join(", ")
    )
}

/// `CREATE TABLE` with every column but no keys and no `AUTO_INCREMENT`.
#[must_use]
pub fn create_table(
    escape: &dyn Escape,
    table: &str,
    schema: &TableSchema,
    config: &SyncConfig,
) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| column_definition(escape, c, false))
        .collect();
    let mut out = format!(
        "CREATE TABLE {} ({}) ENGINE={} DEFAULT CHARSET={} COLLATE={}",
        quote_identifier(escape, table),
        columns.join(", "),
        config.engine,
        config.charset,
        config.collation
    );
    if let Some(comment) = &schema.comment {
        out.push_str(" COMMENT=");
        out.push_str(&literal(escape, comment));
    }
    out
}

/// Adds every declared index, primary key first.
#[must_use]
pub fn index_ops(schema: &TableSchema) -> Vec<AlterOp> {
    let mut ops = Vec::new();
    if let Some(pk) = schema.primary_key() {
        ops.push(AlterOp::AddPrimaryKey(pk.columns.clone()));
    }
    ops.extend(schema.secondary_indexes().cloned().map(AlterOp::AddIndex));
    ops
}

/// Every statement that builds `table` from scratch: the bare
/// `CREATE TABLE`, then the indexes, then the auto-increment flag once its
/// key exists.
#[must_use]
pub fn structure_statements(
    escape: &dyn Escape,
    table: &str,
    schema: &TableSchema,
    config: &SyncConfig,
) -> Vec<String> {
    let mut statements = vec![create_table(escape, table, schema, config)];
    let indexes = index_ops(schema);
    if !indexes.is_empty() {
        statements.push(alter_table(escape, table, &indexes));
    }
    if let Some(column) = schema.auto_increment_column() {
        let op = AlterOp::ChangeColumn {
            name: column.name.clone(),
            column: column.clone(),
            position: None,
        };
        statements.push(alter_table(escape, table, &[op]));
    }
    statements
}

/// `RENAME TABLE a TO b, c TO d`
#[must_use]
pub fn rename_tables(escape: &dyn Escape, pairs: &[(&str, &str)]) -> String {
    let pairs: Vec<String> = pairs
        .iter()
        .map(|(from, to)| {
            format!(
                "{} TO {}",
                quote_identifier(escape, from),
                quote_identifier(escape, to)
            )
        })
        .collect();
    format!("RENAME TABLE {}", pairs.join(", "))
}

/// `DROP TABLE t`
#[must_use]
pub fn drop_table(escape: &dyn Escape, table: &str) -> String {
    format!("DROP TABLE {}", quote_identifier(escape, table))
}

/// `TRUNCATE TABLE t`
#[must_use]
pub fn truncate_table(escape: &dyn Escape, table: &str) -> String {
    format!("TRUNCATE TABLE {}", quote_identifier(escape, table))
}

/// `ALTER TABLE t COMMENT = '...'`
#[must_use]
pub fn table_comment(escape: &dyn Escape, table: &str, comment: &str) -> String {
    format!(
        "ALTER TABLE {} COMMENT = {}",
        quote_identifier(escape, table),
        literal(escape, comment)
    )
}
