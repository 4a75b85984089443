//! Fluent statement builder.
//!
//! A [`Statement`] is created by one of the [`Database`] entry points
//! (`select`, `insert`, `update`, `delete`, `replace`, `raw`), accumulates
//! clauses through consuming fluent calls, and is consumed by a terminal call
//! (`execute`, `get`, `get_one`, `count`, `has`). Consuming the statement is
//! the reset: nothing survives a terminal call, whether it succeeded or not.
//!
//! Exactly one statement may be in progress per [`Database`], except that a
//! SELECT may start while an INSERT is still open.

mod delete;
mod insert;
mod select;
mod update;

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::str::FromStr;

use crate::binder::Bindings;
use crate::condition::{
    compile, group_depth, render_key, Clause, Condition, Conjunction, Fragment, Operand,
};
use crate::connection::{quote_identifier, Connection, Escape, QueryOutput};
use crate::database::Database;
use crate::error::{QueryError, Result};
use crate::filter::{FieldFilter, FilterTranslator};
use crate::value::{Row, SqlValue, ToSqlValue};

// ============================================================================
// Enums
// ============================================================================

/// The kind of statement being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatementKind {
    /// `SELECT`
    #[default]
    Select,
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `DELETE`
    Delete,
    /// `REPLACE`
    Replace,
    /// Hand-written SQL.
    Raw,
}

impl StatementKind {
    /// Upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Replace => "REPLACE",
            Self::Raw => "RAW",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `CROSS JOIN`
    Cross,
}

impl JoinKind {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

impl FromStr for JoinKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_lowercase().as_str() {
            "inner" | "join" | "inner join" => Ok(Self::Inner),
            "left" | "left outer" | "left join" | "left outer join" => Ok(Self::Left),
            "right" | "right outer" | "right join" | "right outer join" => Ok(Self::Right),
            "cross" | "cross join" => Ok(Self::Cross),
            _ => Err(QueryError::InvalidJoinType(s.to_string())),
        }
    }
}

impl TryFrom<&str> for JoinKind {
    type Error = QueryError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// `ASC`
    #[default]
    Asc,
    /// `DESC`
    Desc,
}

impl Direction {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for Direction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(QueryError::InvalidOrderDirection(s.to_string())),
        }
    }
}

impl TryFrom<&str> for Direction {
    type Error = QueryError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

/// Row lock modes for SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `FOR UPDATE`
    ForUpdate,
    /// `LOCK IN SHARE MODE`
    Shared,
}

impl LockMode {
    /// SQL suffix.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ForUpdate => "FOR UPDATE",
            Self::Shared => "LOCK IN SHARE MODE",
        }
    }
}

impl FromStr for LockMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_lowercase().as_str() {
            "update" | "for update" | "exclusive" => Ok(Self::ForUpdate),
            "share" | "shared" | "for share" | "lock in share mode" => Ok(Self::Shared),
            _ => Err(QueryError::InvalidLockMode(s.to_string())),
        }
    }
}

impl TryFrom<&str> for LockMode {
    type Error = QueryError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

// ============================================================================
// Statement state
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Table { name: String, alias: Option<String> },
    Subquery { query: Fragment, alias: String },
}

impl Source {
    /// Parses `"table"`, `"table alias"` or `"table AS alias"`.
    fn parse(spec: &str) -> Self {
        let parts: Vec<&str> = spec.split_whitespace().collect();
        let (name, alias) = match parts.as_slice() {
            [name, kw, alias] if kw.eq_ignore_ascii_case("as") => (*name, Some(*alias)),
            [name, alias] => (*name, Some(*alias)),
            _ => (spec.trim(), None),
        };
        Self::Table {
            name: name.to_string(),
            alias: alias.map(str::to_string),
        }
    }

    fn render(&self, escape: &dyn Escape, bindings: &mut Bindings) -> String {
        match self {
            Self::Table { name, alias: None } => quote_identifier(escape, name),
            Self::Table {
                name,
                alias: Some(alias),
            } => format!(
                "{} AS {}",
                quote_identifier(escape, name),
                quote_identifier(escape, alias)
            ),
            Self::Subquery { query, alias } => {
                bindings.extend(query.bindings());
                format!("({}) AS {}", query.sql(), quote_identifier(escape, alias))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Join {
    kind: JoinKind,
    source: Source,
    on: String,
}

#[derive(Debug, Clone, PartialEq)]
enum OrderBy {
    Column(String, Direction),
    Field { column: String, values: Vec<SqlValue> },
    Random,
}

#[derive(Debug, Clone, PartialEq)]
enum SetValue {
    Value(SqlValue),
    Expr(Fragment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LockChoice {
    /// `FOR UPDATE` inside a transaction, nothing otherwise.
    #[default]
    Auto,
    Explicit(LockMode),
    Off,
}

impl LockChoice {
    const fn resolve(self, in_transaction: bool) -> Option<LockMode> {
        match self {
            Self::Auto if in_transaction => Some(LockMode::ForUpdate),
            Self::Auto | Self::Off => None,
            Self::Explicit(mode) => Some(mode),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct StatementState {
    kind: StatementKind,
    source: Option<Source>,
    columns: Vec<String>,
    distinct: bool,
    joins: Vec<Join>,
    wheres: Vec<Clause>,
    groups: Vec<String>,
    havings: Vec<Clause>,
    orders: Vec<OrderBy>,
    limit: Option<(u64, u64)>,
    data: Vec<(String, SetValue)>,
    duplicate_update: Vec<String>,
    lock: LockChoice,
    raw: Option<Fragment>,
    error: Option<QueryError>,
}

/// What a terminal `execute` returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    /// Rows changed by the statement.
    pub affected_rows: u64,
    /// Generated id, captured for INSERT statements only.
    pub insert_id: Option<u64>,
    /// Result rows for row-returning statements.
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    Plain,
    Count,
    Exists,
}

// ============================================================================
// Statement
// ============================================================================

/// One in-progress statement bound to a [`Database`].
///
/// Dropping a statement without a terminal call discards it and frees the
/// database for the next one. A statement poisoned by a malformed fluent
/// call reports its error to the sink when it is dropped unexecuted.
pub struct Statement<'db, C: Connection> {
    db: &'db Database<C>,
    state: StatementState,
    slot: Option<StatementKind>,
}

impl<C: Connection> fmt::Debug for Statement<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("kind", &self.state.kind)
            .field("poisoned", &self.state.error.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Drop for Statement<'_, C> {
    fn drop(&mut self) {
        // A poisoned statement that never reached a terminal call still
        // reports its error once.
        if let Some(err) = self.state.error.take() {
            self.db.fail(err, None);
        }
        if let Some(kind) = self.slot.take() {
            self.db.release(kind);
        }
    }
}

impl<'db, C: Connection> Statement<'db, C> {
    pub(crate) fn new(db: &'db Database<C>, kind: StatementKind) -> Self {
        Self {
            db,
            state: StatementState {
                kind,
                ..StatementState::default()
            },
            slot: Some(kind),
        }
    }

    pub(crate) fn with_columns(mut self, columns: &[&str]) -> Self {
        self.state.columns = columns.iter().map(|c| String::from(*c)).collect();
        self
    }

    pub(crate) fn with_table(mut self, table: &str) -> Self {
        self.state.source = Some(Source::parse(table));
        self
    }

    pub(crate) fn with_raw(mut self, raw: Fragment) -> Self {
        self.state.raw = Some(raw);
        self
    }

    /// The statement kind.
    #[must_use]
    pub const fn kind(&self) -> StatementKind {
        self.state.kind
    }

    fn poison(&mut self, err: QueryError) {
        if self.state.error.is_none() {
            self.state.error = Some(err);
        }
    }

    /// Duplicates the in-progress state, sharing the database.
    ///
    /// The copy does not hold the statement slot, so it can be run while the
    /// original stays open (for example `count()` before `get()`).
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            db: self.db,
            state: self.state.clone(),
            slot: None,
        }
    }

    // ------------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------------

    /// Sets the table, optionally aliased (`"users u"`, `"users AS u"`).
    #[must_use]
    pub fn from(self, table: &str) -> Self {
        self.with_table(table)
    }

    /// Selects from a subquery.
    #[must_use]
    pub fn from_subquery(mut self, query: Fragment, alias: &str) -> Self {
        self.state.source = Some(Source::Subquery {
            query,
            alias: alias.to_string(),
        });
        self
    }

    /// Adds `DISTINCT`.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.state.distinct = true;
        self
    }

    /// Adds a join. `kind` is a [`JoinKind`] or its name (`"left"`).
    ///
    /// `on` is emitted verbatim; pass an empty string for CROSS joins.
    #[must_use]
    pub fn join<K>(mut self, kind: K, table: &str, on: &str) -> Self
    where
        K: TryInto<JoinKind>,
        QueryError: From<K::Error>,
    {
        match kind.try_into() {
            Ok(kind) => self.state.joins.push(Join {
                kind,
                source: Source::parse(table),
                on: on.trim().to_string(),
            }),
            Err(e) => self.poison(e.into()),
        }
        self
    }

    /// Adds an `INNER JOIN`.
    #[must_use]
    pub fn inner_join(self, table: &str, on: &str) -> Self {
        self.join(JoinKind::Inner, table, on)
    }

    /// Adds a `LEFT JOIN`.
    #[must_use]
    pub fn left_join(self, table: &str, on: &str) -> Self {
        self.join(JoinKind::Left, table, on)
    }

    // ------------------------------------------------------------------------
    // WHERE
    // ------------------------------------------------------------------------

    fn push_where(mut self, conjunction: Conjunction, key: &str, condition: Condition) -> Self {
        self.state.wheres.push(Clause::Predicate {
            conjunction,
            key: key.to_string(),
            condition,
        });
        self
    }

    /// Adds an `AND` condition. A plain value means equality.
    #[must_use]
    pub fn and_where(self, key: &str, condition: impl Into<Condition>) -> Self {
        self.push_where(Conjunction::And, key, condition.into())
    }

    /// Adds an `OR` condition. A plain value means equality.
    #[must_use]
    pub fn or_where(self, key: &str, condition: impl Into<Condition>) -> Self {
        self.push_where(Conjunction::Or, key, condition.into())
    }

    /// Adds an `AND` condition from an operator string such as `">="` or
    /// `"not in"`.
    #[must_use]
    pub fn where_op(self, key: &str, operator: &str, operand: impl Into<Operand>) -> Self {
        self.push_op(Conjunction::And, key, operator, operand.into())
    }

    /// `OR` form of [`Statement::where_op`].
    #[must_use]
    pub fn or_where_op(self, key: &str, operator: &str, operand: impl Into<Operand>) -> Self {
        self.push_op(Conjunction::Or, key, operator, operand.into())
    }

    fn push_op(mut self, conjunction: Conjunction, key: &str, operator: &str, operand: Operand) -> Self {
        match Condition::parse(operator, operand) {
            Ok(condition) => self.push_where(conjunction, key, condition),
            Err(e) => {
                self.poison(e);
                self
            }
        }
    }

    /// Adds a pre-built boolean expression with `AND`.
    #[must_use]
    pub fn where_raw(mut self, fragment: Fragment) -> Self {
        self.state.wheres.push(Clause::Expr {
            conjunction: Conjunction::And,
            fragment,
        });
        self
    }

    /// Adds a pre-built boolean expression with `OR`.
    #[must_use]
    pub fn or_where_raw(mut self, fragment: Fragment) -> Self {
        self.state.wheres.push(Clause::Expr {
            conjunction: Conjunction::Or,
            fragment,
        });
        self
    }

    /// Adds `EXISTS (subquery)`.
    #[must_use]
    pub fn where_exists(self, query: Fragment) -> Self {
        self.push_where(Conjunction::And, "", Condition::Exists(query))
    }

    /// Adds `NOT EXISTS (subquery)`.
    #[must_use]
    pub fn where_not_exists(self, query: Fragment) -> Self {
        self.push_where(Conjunction::And, "", Condition::NotExists(query))
    }

    /// Opens a group joined with `AND`.
    #[must_use]
    pub fn where_open(mut self) -> Self {
        self.state.wheres.push(Clause::Open(Conjunction::And));
        self
    }

    /// Opens a group joined with `OR`.
    #[must_use]
    pub fn or_where_open(mut self) -> Self {
        self.state.wheres.push(Clause::Open(Conjunction::Or));
        self
    }

    /// Closes the innermost group.
    #[must_use]
    pub fn where_close(mut self) -> Self {
        self.state.wheres.push(Clause::Close);
        self
    }

    /// Adds the translation of a declarative filter as one `AND` operand.
    #[must_use]
    pub fn where_filter(
        mut self,
        translator: &FilterTranslator<'_>,
        filters: &BTreeMap<String, FieldFilter>,
        mode: Conjunction,
    ) -> Self {
        match self
            .db
            .with_escape(|escape| translator.translate(filters, mode, escape))
        {
            Ok(Some(fragment)) => self.where_raw(fragment),
            Ok(None) => self,
            Err(e) => {
                self.poison(e);
                self
            }
        }
    }

    // ------------------------------------------------------------------------
    // GROUP BY / HAVING
    // ------------------------------------------------------------------------

    /// Adds GROUP BY columns.
    #[must_use]
    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.state
            .groups
            .extend(columns.iter().map(|c| String::from(*c)));
        self
    }

    /// Adds an `AND` HAVING condition.
    #[must_use]
    pub fn having(mut self, key: &str, condition: impl Into<Condition>) -> Self {
        self.state.havings.push(Clause::Predicate {
            conjunction: Conjunction::And,
            key: key.to_string(),
            condition: condition.into(),
        });
        self
    }

    /// Adds an `OR` HAVING condition.
    #[must_use]
    pub fn or_having(mut self, key: &str, condition: impl Into<Condition>) -> Self {
        self.state.havings.push(Clause::Predicate {
            conjunction: Conjunction::Or,
            key: key.to_string(),
            condition: condition.into(),
        });
        self
    }

    /// Adds an `AND` HAVING condition from an operator string.
    #[must_use]
    pub fn having_op(mut self, key: &str, operator: &str, operand: impl Into<Operand>) -> Self {
        match Condition::parse(operator, operand.into()) {
            Ok(condition) => self.having(key, condition),
            Err(e) => {
                self.poison(e);
                self
            }
        }
    }

    // ------------------------------------------------------------------------
    // ORDER BY / LIMIT
    // ------------------------------------------------------------------------

    /// Adds an ORDER BY column. `RAND()` is recognised and left unquoted.
    #[must_use]
    pub fn order_by<D>(mut self, column: &str, direction: D) -> Self
    where
        D: TryInto<Direction>,
        QueryError: From<D::Error>,
    {
        let compact: String = column.split_whitespace().collect();
        if compact.eq_ignore_ascii_case("rand()") {
            self.state.orders.push(OrderBy::Random);
            return self;
        }
        match direction.try_into() {
            Ok(direction) => self
                .state
                .orders
                .push(OrderBy::Column(column.trim().to_string(), direction)),
            Err(e) => self.poison(e.into()),
        }
        self
    }

    /// Sorts rows whose `column` matches one of `values` first, in the given
    /// order.
    #[must_use]
    pub fn order_by_field<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToSqlValue,
    {
        let values: Vec<SqlValue> = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        if !values.is_empty() {
            self.state.orders.push(OrderBy::Field {
                column: column.trim().to_string(),
                values,
            });
        }
        self
    }

    /// Returns at most `count` rows. Same as `limit_offset(0, count)`.
    #[must_use]
    pub const fn limit(self, count: u64) -> Self {
        self.limit_offset(0, count)
    }

    /// Returns rows `[offset, offset + count)`.
    #[must_use]
    pub const fn limit_offset(mut self, offset: u64, count: u64) -> Self {
        self.state.limit = Some((offset, count));
        self
    }

    // ------------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------------

    /// Sets a column value for INSERT, REPLACE or UPDATE.
    #[must_use]
    pub fn set(mut self, column: &str, value: impl ToSqlValue) -> Self {
        self.put(column, SetValue::Value(value.to_sql_value()));
        self
    }

    /// Sets a column to an expression, e.g. `count + ?`.
    #[must_use]
    pub fn set_expr(mut self, column: &str, expr: Fragment) -> Self {
        self.put(column, SetValue::Expr(expr));
        self
    }

    /// Sets several column values at once.
    #[must_use]
    pub fn values<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToSqlValue,
    {
        for (column, value) in values {
            self.put(column.as_ref(), SetValue::Value(value.to_sql_value()));
        }
        self
    }

    fn put(&mut self, column: &str, value: SetValue) {
        let column = column.trim();
        if let Some(slot) = self.state.data.iter_mut().find(|(c, _)| c == column) {
            slot.1 = value;
        } else {
            self.state.data.push((column.to_string(), value));
        }
    }

    /// Adds `ON DUPLICATE KEY UPDATE c = VALUES(c)` for each column.
    #[must_use]
    pub fn on_duplicate_update(mut self, columns: &[&str]) -> Self {
        self.state
            .duplicate_update
            .extend(columns.iter().map(|c| String::from(*c)));
        self
    }

    // ------------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------------

    /// Locks selected rows. `mode` is a [`LockMode`] or its name.
    #[must_use]
    pub fn lock<M>(mut self, mode: M) -> Self
    where
        M: TryInto<LockMode>,
        QueryError: From<M::Error>,
    {
        match mode.try_into() {
            Ok(mode) => self.state.lock = LockChoice::Explicit(mode),
            Err(e) => self.poison(e.into()),
        }
        self
    }

    /// Never appends a lock clause, even inside a transaction.
    #[must_use]
    pub const fn without_lock(mut self) -> Self {
        self.state.lock = LockChoice::Off;
        self
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Renders the SQL text and bindings `execute` would send.
    pub fn to_sql(&self) -> Result<(String, Bindings)> {
        let in_transaction = self.db.in_transaction();
        self.db
            .with_escape(|escape| render(&self.state, escape, in_transaction, Form::Plain))
    }

    /// Renders the SQL with bound values substituted, for logs.
    pub fn debug_sql(&self) -> Result<String> {
        let (sql, bindings) = self.to_sql()?;
        Ok(self
            .db
            .with_escape(|escape| bindings.render_debug_sql(&sql, escape)))
    }

    // ------------------------------------------------------------------------
    // Terminal calls
    // ------------------------------------------------------------------------

    /// Executes the statement.
    pub fn execute(self) -> Result<ExecOutcome> {
        let kind = self.state.kind;
        let out = self.run(Form::Plain)?;
        Ok(ExecOutcome {
            affected_rows: out.affected_rows,
            insert_id: (kind == StatementKind::Insert).then_some(out.insert_id),
            rows: out.rows,
        })
    }

    /// Executes a SELECT (or raw query) and returns its rows.
    pub fn get(self) -> Result<Vec<Row>> {
        let me = self.require_rows("get")?;
        Ok(me.run(Form::Plain)?.rows)
    }

    /// Returns the first row, limiting the query to one row.
    pub fn get_one(mut self) -> Result<Option<Row>> {
        if self.state.kind == StatementKind::Select {
            let offset = self.state.limit.map_or(0, |(o, _)| o);
            self.state.limit = Some((offset, 1));
        }
        let me = self.require_rows("get_one")?;
        Ok(me.run(Form::Plain)?.rows.into_iter().next())
    }

    /// Counts the rows the SELECT would return.
    ///
    /// Grouped or distinct selects are counted through a derived table.
    pub fn count(self) -> Result<u64> {
        let me = self.require_select("count")?;
        let rows = me.run(Form::Count)?.rows;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(SqlValue::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0))
    }

    /// Returns `true` when the SELECT matches at least one row.
    pub fn has(self) -> Result<bool> {
        let me = self.require_select("has")?;
        Ok(!me.run(Form::Exists)?.rows.is_empty())
    }

    fn require_select(mut self, operation: &'static str) -> Result<Self> {
        if self.state.kind == StatementKind::Select {
            return Ok(self);
        }
        let state = mem::take(&mut self.state);
        let err = state.error.unwrap_or(QueryError::UnsupportedTerminal {
            kind: state.kind,
            operation,
        });
        Err(self.db.fail(err, None))
    }

    fn require_rows(self, operation: &'static str) -> Result<Self> {
        if self.state.kind == StatementKind::Raw {
            return Ok(self);
        }
        self.require_select(operation)
    }

    fn run(mut self, form: Form) -> Result<QueryOutput> {
        let state = mem::take(&mut self.state);
        let in_transaction = self.db.in_transaction();
        let rendered = self
            .db
            .with_escape(|escape| render(&state, escape, in_transaction, form));
        match rendered {
            Ok((sql, bindings)) => self.db.run(state.kind, &sql, &bindings),
            Err(e) => Err(self.db.fail(e, None)),
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn render(
    state: &StatementState,
    escape: &dyn Escape,
    in_transaction: bool,
    form: Form,
) -> Result<(String, Bindings)> {
    if let Some(err) = &state.error {
        return Err(err.clone());
    }
    if group_depth(&state.wheres) != 0 || group_depth(&state.havings) != 0 {
        return Err(QueryError::UnbalancedGroup);
    }

    let mut bindings = Bindings::new();
    let sql = match state.kind {
        StatementKind::Select => {
            let lock = state.lock.resolve(in_transaction);
            select::render(state, escape, lock, form, &mut bindings)
        }
        StatementKind::Insert | StatementKind::Replace => {
            insert::render(state, escape, &mut bindings)?
        }
        StatementKind::Update => update::render(state, escape, &mut bindings)?,
        StatementKind::Delete => delete::render(state, escape, &mut bindings)?,
        StatementKind::Raw => {
            let raw = state.raw.clone().unwrap_or_default();
            let (sql, raw_bindings) = raw.into_parts();
            bindings.extend(&raw_bindings);
            sql
        }
    };
    Ok((sql, bindings))
}

fn render_table(state: &StatementState, escape: &dyn Escape, bindings: &mut Bindings) -> Result<String> {
    state
        .source
        .as_ref()
        .map(|source| source.render(escape, bindings))
        .ok_or(QueryError::MissingTable(state.kind))
}

fn render_joins(state: &StatementState, escape: &dyn Escape, bindings: &mut Bindings) -> String {
    let mut out = String::new();
    for join in &state.joins {
        out.push(' ');
        out.push_str(join.kind.as_sql());
        out.push(' ');
        out.push_str(&join.source.render(escape, bindings));
        if !join.on.is_empty() {
            out.push_str(" ON ");
            out.push_str(&join.on);
        }
    }
    out
}

fn render_conditions(
    keyword: &str,
    clauses: &[Clause],
    escape: &dyn Escape,
    bindings: &mut Bindings,
) -> String {
    if clauses.is_empty() {
        return String::new();
    }
    format!(" {keyword} {}", compile(clauses, escape, bindings))
}

fn render_order(state: &StatementState, escape: &dyn Escape, bindings: &mut Bindings) -> String {
    if state.orders.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = state
        .orders
        .iter()
        .map(|order| match order {
            OrderBy::Column(column, direction) => {
                format!(
                    "{} {}",
                    render_key(escape, column),
                    direction.as_sql()
                )
            }
            OrderBy::Field { column, values } => {
                let column = render_key(escape, column);
                let placeholders = bindings.bind_many(values.iter().rev());
                format!("FIELD({column}, {placeholders}) DESC")
            }
            OrderBy::Random => String::from("RAND()"),
        })
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

fn render_limit(limit: Option<(u64, u64)>) -> String {
    match limit {
        Some((offset, count)) if offset > 0 => format!(" LIMIT {offset}, {count}"),
        Some((_, count)) => format!(" LIMIT {count}"),
        None => String::new(),
    }
}

/// UPDATE and DELETE take no offset, and their multi-table forms take
/// neither ORDER BY nor LIMIT.
fn check_modify_clauses(state: &StatementState) -> Result<()> {
    let unsupported = |clause| {
        Err(QueryError::UnsupportedClause {
            kind: state.kind,
            clause,
        })
    };
    if state.limit.is_some_and(|(offset, _)| offset > 0) {
        return unsupported("LIMIT offset");
    }
    if !state.joins.is_empty() {
        if !state.orders.is_empty() {
            return unsupported("ORDER BY with JOIN");
        }
        if state.limit.is_some() {
            return unsupported("LIMIT with JOIN");
        }
    }
    Ok(())
}

fn render_column(escape: &dyn Escape, column: &str) -> String {
    let column = column.trim();
    let lower = column.to_ascii_lowercase();
    if let Some(pos) = lower.rfind(" as ") {
        let (expr, alias) = (column[..pos].trim(), column[pos + 4..].trim());
        return format!(
            "{} AS {}",
            render_key(escape, expr),
            quote_identifier(escape, alias)
        );
    }
    render_key(escape, column)
}

fn render_assignments(
    data: &[(String, SetValue)],
    escape: &dyn Escape,
    bindings: &mut Bindings,
) -> String {
    data.iter()
        .map(|(column, value)| {
            let column = quote_identifier(escape, column);
            match value {
                SetValue::Value(v) => format!("{column} = {}", bindings.bind(v)),
                SetValue::Expr(expr) => {
                    bindings.extend(expr.bindings());
                    format!("{column} = {}", expr.sql())
                }
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
