//! Condition compiler for WHERE and HAVING clauses.
//!
//! A clause list is an ordered sequence of predicates, explicit groups and
//! pre-built expressions. [`compile`] walks it left to right, emitting SQL
//! text and binding operands in the same order, so the placeholders and the
//! bound values always line up.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::binder::Bindings;
use crate::connection::{Escape, quote_identifier};
use crate::error::{QueryError, Result};
use crate::value::{SqlValue, ToSqlValue};

/// How a clause attaches to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    /// `AND`
    #[default]
    And,
    /// `OR`
    Or,
}

impl Conjunction {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A pre-built SQL expression with its own bound values.
///
/// Used for subqueries, raw predicates and filter output. When spliced into
/// a statement its bindings are appended at the splice position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    sql: String,
    bindings: Bindings,
}

impl Fragment {
    /// Creates a fragment without bound values.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Bindings::new(),
        }
    }

    /// Creates a fragment from SQL text and already-bound values.
    pub fn with_bindings(sql: impl Into<String>, bindings: Bindings) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }

    /// Binds one more value for the next unbound `?` in the fragment.
    #[must_use]
    pub fn bind(mut self, value: impl ToSqlValue) -> Self {
        self.bindings.bind(value);
        self
    }

    /// SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound values.
    #[must_use]
    pub const fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Returns `true` when the fragment has no SQL text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// Splits into SQL text and bindings.
    #[must_use]
    pub fn into_parts(self) -> (String, Bindings) {
        (self.sql, self.bindings)
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `<=>` (NULL-safe equality)
    NullSafeEq,
    /// `REGEXP`
    Regexp,
    /// `NOT REGEXP`
    NotRegexp,
}

impl CompareOp {
    /// SQL operator text.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::NullSafeEq => "<=>",
            Self::Regexp => "REGEXP",
            Self::NotRegexp => "NOT REGEXP",
        }
    }
}

/// The right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `key op ?`
    Compare(CompareOp, SqlValue),
    /// `key IS NULL`
    IsNull,
    /// `key IS NOT NULL`
    IsNotNull,
    /// `key IN (?, ...)`
    In(Vec<SqlValue>),
    /// `key NOT IN (?, ...)`
    NotIn(Vec<SqlValue>),
    /// `key IN (subquery)`
    InQuery(Fragment),
    /// `key NOT IN (subquery)`
    NotInQuery(Fragment),
    /// `FIND_IN_SET(?, key)`
    InSet(SqlValue),
    /// `key BETWEEN ? AND ?`
    Between(SqlValue, SqlValue),
    /// `key NOT BETWEEN ? AND ?`
    NotBetween(SqlValue, SqlValue),
    /// `EXISTS (subquery)`; the key is ignored.
    Exists(Fragment),
    /// `NOT EXISTS (subquery)`; the key is ignored.
    NotExists(Fragment),
    /// `key LIKE ?`; the caller supplies the wildcards.
    Like(SqlValue),
    /// `key NOT LIKE ?`
    NotLike(SqlValue),
    /// `MATCH(key) AGAINST (? IN BOOLEAN MODE)`
    FullText(String),
}

/// Operand shapes accepted by [`Condition::parse`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A single value.
    Value(SqlValue),
    /// A list of values.
    List(Vec<SqlValue>),
    /// A pair of bounds.
    Range(SqlValue, SqlValue),
    /// A pre-built subquery.
    Query(Fragment),
}

impl<T: ToSqlValue> From<T> for Operand {
    fn from(value: T) -> Self {
        Self::Value(value.to_sql_value())
    }
}

impl Condition {
    /// Comparison with NULL rewriting: `= NULL` becomes `IS NULL`, any other
    /// operator against NULL becomes `IS NOT NULL`.
    pub fn compare(op: CompareOp, value: impl ToSqlValue) -> Self {
        match value.to_sql_value() {
            SqlValue::Null if op == CompareOp::Eq => Self::IsNull,
            SqlValue::Null => Self::IsNotNull,
            v => Self::Compare(op, v),
        }
    }

    /// `= value` (scalar form).
    pub fn eq(value: impl ToSqlValue) -> Self {
        Self::compare(CompareOp::Eq, value)
    }

    /// `!= value`
    pub fn ne(value: impl ToSqlValue) -> Self {
        Self::compare(CompareOp::Ne, value)
    }

    /// `> value`
    pub fn gt(value: impl ToSqlValue) -> Self {
        Self::compare(CompareOp::Gt, value)
    }

    /// `>= value`
    pub fn gte(value: impl ToSqlValue) -> Self {
        Self::compare(CompareOp::Gte, value)
    }

    /// `< value`
    pub fn lt(value: impl ToSqlValue) -> Self {
        Self::compare(CompareOp::Lt, value)
    }

    /// `<= value`
    pub fn lte(value: impl ToSqlValue) -> Self {
        Self::compare(CompareOp::Lte, value)
    }

    /// `IN (values...)`
    pub fn in_list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToSqlValue,
    {
        Self::In(values.into_iter().map(ToSqlValue::to_sql_value).collect())
    }

    /// `NOT IN (values...)`
    pub fn not_in<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToSqlValue,
    {
        Self::NotIn(values.into_iter().map(ToSqlValue::to_sql_value).collect())
    }

    /// `BETWEEN low AND high`
    pub fn between(low: impl ToSqlValue, high: impl ToSqlValue) -> Self {
        Self::Between(low.to_sql_value(), high.to_sql_value())
    }

    /// `LIKE pattern`
    pub fn like(pattern: impl ToSqlValue) -> Self {
        Self::Like(pattern.to_sql_value())
    }

    /// Boolean-mode full-text search for every word of `text`.
    pub fn fulltext(text: impl Into<String>) -> Self {
        Self::FullText(text.into())
    }

    /// Builds a condition from an operator string and an operand.
    ///
    /// Operator names are matched case-insensitively with whitespace
    /// collapsed (`"NOT  IN"` equals `"not in"`).
    pub fn parse(operator: &str, operand: Operand) -> Result<Self> {
        let op = operator
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        let invalid = |expected: &'static str| QueryError::InvalidOperand {
            operator: op.clone(),
            expected,
        };

        let compare = match op.as_str() {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Gte),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Lte),
            "<=>" => Some(CompareOp::NullSafeEq),
            "regexp" => Some(CompareOp::Regexp),
            "not regexp" => Some(CompareOp::NotRegexp),
            _ => None,
        };
        if let Some(cmp) = compare {
            return match operand {
                Operand::Value(v) => Ok(Self::compare(cmp, v)),
                _ => Err(invalid("a single value")),
            };
        }

        match (op.as_str(), operand) {
            ("in", Operand::Query(q)) => Ok(Self::InQuery(q)),
            ("not in", Operand::Query(q)) => Ok(Self::NotInQuery(q)),
            ("in", Operand::List(vals)) => Ok(Self::In(vals)),
            ("not in", Operand::List(vals)) => Ok(Self::NotIn(vals)),
            ("in", Operand::Value(v)) => Ok(Self::In(vec![v])),
            ("not in", Operand::Value(v)) => Ok(Self::NotIn(vec![v])),
            ("in" | "not in", _) => Err(invalid("a list of values or a subquery")),
            ("inset", Operand::Value(v)) => Ok(Self::InSet(v)),
            ("inset", _) => Err(invalid("a single value")),
            ("between", Operand::Range(a, b)) => Ok(Self::Between(a, b)),
            ("not between", Operand::Range(a, b)) => Ok(Self::NotBetween(a, b)),
            ("between" | "not between", Operand::List(vals)) if vals.len() == 2 => {
                let mut it = vals.into_iter();
                let (a, b) = (it.next(), it.next());
                match (a, b) {
                    (Some(a), Some(b)) if op == "between" => Ok(Self::Between(a, b)),
                    (Some(a), Some(b)) => Ok(Self::NotBetween(a, b)),
                    _ => Err(invalid("exactly two values")),
                }
            }
            ("between" | "not between", _) => Err(invalid("exactly two values")),
            ("exists", Operand::Query(q)) => Ok(Self::Exists(q)),
            ("not exists", Operand::Query(q)) => Ok(Self::NotExists(q)),
            ("exists" | "not exists", _) => Err(invalid("a subquery")),
            ("like", Operand::Value(v)) => Ok(Self::Like(v)),
            ("not like", Operand::Value(v)) => Ok(Self::NotLike(v)),
            ("like" | "not like", _) => Err(invalid("a single value")),
            ("fulltext", Operand::Value(v)) => Ok(Self::FullText(v.to_string())),
            ("fulltext", _) => Err(invalid("a search string")),
            ("is null", _) => Ok(Self::IsNull),
            ("is not null", _) => Ok(Self::IsNotNull),
            _ => Err(QueryError::InvalidOperator(operator.to_string())),
        }
    }
}

/// A plain value converts to an equality condition.
impl<T: ToSqlValue> From<T> for Condition {
    fn from(value: T) -> Self {
        Self::eq(value)
    }
}

/// One entry of a WHERE/HAVING clause list.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `(`; the conjunction attaches in front of the parenthesis.
    Open(Conjunction),
    /// `)`
    Close,
    /// `key <condition>`
    Predicate {
        /// Conjunction with the previous entry.
        conjunction: Conjunction,
        /// Column name or SQL expression the condition applies to.
        key: String,
        /// The condition.
        condition: Condition,
    },
    /// A pre-formed boolean expression, emitted verbatim.
    Expr {
        /// Conjunction with the previous entry.
        conjunction: Conjunction,
        /// The expression and its bindings.
        fragment: Fragment,
    },
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.([A-Za-z_][A-Za-z0-9_$]*|\*))?$").ok()
        })
        .as_ref()
}

/// Returns `true` for a plain, optionally table-qualified, identifier.
#[must_use]
pub fn is_identifier(key: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(key))
}

/// Quotes `key` when it is a plain (optionally table-qualified) identifier,
/// otherwise passes the expression through untouched.
#[must_use]
pub fn render_key(escape: &dyn Escape, key: &str) -> String {
    let key = key.trim();
    if is_identifier(key) {
        quote_identifier(escape, key)
    } else {
        key.to_string()
    }
}

/// Turns free text into boolean-mode terms: every word becomes `+word*`.
///
/// Boolean operator characters inside words are stripped so user input
/// cannot change the query shape.
#[must_use]
pub fn fulltext_terms(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.replace(['+', '-', '<', '>', '(', ')', '~', '*', '"', '@'], ""))
        .filter(|w| !w.is_empty())
        .map(|w| format!("+{w}*"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_predicate(
    escape: &dyn Escape,
    key: &str,
    condition: &Condition,
    bindings: &mut Bindings,
) -> String {
    match condition {
        Condition::Compare(op, v) => {
            let k = render_key(escape, key);
            format!("{k} {} {}", op.as_sql(), bindings.bind(v))
        }
        Condition::IsNull => format!("{} IS NULL", render_key(escape, key)),
        Condition::IsNotNull => format!("{} IS NOT NULL", render_key(escape, key)),
        Condition::In(vals) if vals.is_empty() => String::from("0 = 1"),
        Condition::NotIn(vals) if vals.is_empty() => String::from("1 = 1"),
        Condition::In(vals) => {
            let k = render_key(escape, key);
            format!("{k} IN ({})", bindings.bind_many(vals))
        }
        Condition::NotIn(vals) => {
            let k = render_key(escape, key);
            format!("{k} NOT IN ({})", bindings.bind_many(vals))
        }
        Condition::InQuery(q) => {
            bindings.extend(q.bindings());
            format!("{} IN ({})", render_key(escape, key), q.sql())
        }
        Condition::NotInQuery(q) => {
            bindings.extend(q.bindings());
            format!("{} NOT IN ({})", render_key(escape, key), q.sql())
        }
        Condition::InSet(v) => {
            let p = bindings.bind(v);
            format!("FIND_IN_SET({p}, {})", render_key(escape, key))
        }
        Condition::Between(a, b) | Condition::NotBetween(a, b) => {
            let k = render_key(escape, key);
            let keyword = if matches!(condition, Condition::Between(..)) {
                "BETWEEN"
            } else {
                "NOT BETWEEN"
            };
            let low = bindings.bind(a);
            let high = bindings.bind(b);
            format!("{k} {keyword} {low} AND {high}")
        }
        Condition::Exists(q) => {
            bindings.extend(q.bindings());
            format!("EXISTS ({})", q.sql())
        }
        Condition::NotExists(q) => {
            bindings.extend(q.bindings());
            format!("NOT EXISTS ({})", q.sql())
        }
        Condition::Like(v) => format!("{} LIKE {}", render_key(escape, key), bindings.bind(v)),
        Condition::NotLike(v) => {
            format!("{} NOT LIKE {}", render_key(escape, key), bindings.bind(v))
        }
        Condition::FullText(text) => {
            let columns = key
                .split(',')
                .map(|c| render_key(escape, c))
                .collect::<Vec<_>>()
                .join(", ");
            let p = bindings.bind(fulltext_terms(text));
            format!("MATCH({columns}) AGAINST ({p} IN BOOLEAN MODE)")
        }
    }
}

/// Compiles a clause list into SQL text (without the WHERE/HAVING keyword).
///
/// The first entry's conjunction is suppressed, as is the conjunction of the
/// entry right after an opening parenthesis.
pub fn compile(clauses: &[Clause], escape: &dyn Escape, bindings: &mut Bindings) -> String {
    let mut out = String::new();
    let mut suppress = true;
    for clause in clauses {
        match clause {
            Clause::Open(conjunction) => {
                if !suppress {
                    out.push(' ');
                    out.push_str(conjunction.as_sql());
                    out.push(' ');
                }
                out.push('(');
                suppress = true;
            }
            Clause::Close => {
                out.push(')');
                suppress = false;
            }
            Clause::Predicate {
                conjunction,
                key,
                condition,
            } => {
                if !suppress {
                    out.push(' ');
                    out.push_str(conjunction.as_sql());
                    out.push(' ');
                }
                out.push_str(&render_predicate(escape, key, condition, bindings));
                suppress = false;
            }
            Clause::Expr {
                conjunction,
                fragment,
            } => {
                if !suppress {
                    out.push(' ');
                    out.push_str(conjunction.as_sql());
                    out.push(' ');
                }
                out.push_str(fragment.sql());
                bindings.extend(fragment.bindings());
                suppress = false;
            }
        }
    }
    out
}

/// Returns the open-group depth left at the end of a clause list.
///
/// Negative when a group was closed that was never opened.
#[must_use]
pub fn group_depth(clauses: &[Clause]) -> i64 {
    clauses.iter().fold(0, |depth, c| match c {
        Clause::Open(_) => depth + 1,
        Clause::Close => depth - 1,
        _ => depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MySqlEscape;

    fn pred(conjunction: Conjunction, key: &str, condition: Condition) -> Clause {
        Clause::Predicate {
            conjunction,
            key: key.to_string(),
            condition,
        }
    }

    fn run(clauses: &[Clause]) -> (String, Bindings) {
        let mut b = Bindings::new();
        let sql = compile(clauses, &MySqlEscape, &mut b);
        (sql, b)
    }

    #[test]
    fn test_first_conjunction_suppressed() {
        let (sql, b) = run(&[
            pred(Conjunction::Or, "a", Condition::eq(1)),
            pred(Conjunction::And, "b", Condition::eq(2)),
        ]);
        assert_eq!(sql, "`a` = ? AND `b` = ?");
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_grouping() {
        let (sql, b) = run(&[
            pred(Conjunction::And, "a", Condition::eq(1)),
            Clause::Open(Conjunction::And),
            pred(Conjunction::Or, "b", Condition::eq(2)),
            pred(Conjunction::Or, "c", Condition::eq(3)),
            Clause::Close,
            pred(Conjunction::Or, "d", Condition::gt(4)),
        ]);
        assert_eq!(sql, "`a` = ? AND (`b` = ? OR `c` = ?) OR `d` > ?");
        assert_eq!(
            b.values(),
            &[
                SqlValue::Int(1),
                SqlValue::Int(2),
                SqlValue::Int(3),
                SqlValue::Int(4)
            ]
        );
    }

    #[test]
    fn test_null_rewrite() {
        assert_eq!(Condition::eq(SqlValue::Null), Condition::IsNull);
        assert_eq!(Condition::ne(None::<i32>), Condition::IsNotNull);
        assert_eq!(Condition::gt(SqlValue::Null), Condition::IsNotNull);
        let (sql, b) = run(&[pred(Conjunction::And, "deleted_at", Condition::IsNull)]);
        assert_eq!(sql, "`deleted_at` IS NULL");
        assert!(b.is_empty());
    }

    #[test]
    fn test_in_list_and_empty_in() {
        let (sql, b) = run(&[pred(Conjunction::And, "id", Condition::in_list([1, 2, 3]))]);
        assert_eq!(sql, "`id` IN (?, ?, ?)");
        assert_eq!(b.len(), 3);

        let (sql, _) = run(&[pred(
            Conjunction::And,
            "id",
            Condition::in_list(Vec::<i32>::new()),
        )]);
        assert_eq!(sql, "0 = 1");
    }

    #[test]
    fn test_in_subquery_splices_bindings() {
        let sub = Fragment::new("SELECT `user_id` FROM `bans` WHERE `level` > ?").bind(2);
        let (sql, b) = run(&[
            pred(Conjunction::And, "active", Condition::eq(1)),
            pred(Conjunction::And, "id", Condition::InQuery(sub)),
        ]);
        assert_eq!(
            sql,
            "`active` = ? AND `id` IN (SELECT `user_id` FROM `bans` WHERE `level` > ?)"
        );
        assert_eq!(b.values(), &[SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_inset_between_like() {
        let (sql, b) = run(&[
            pred(Conjunction::And, "tags", Condition::InSet("red".to_sql_value())),
            pred(Conjunction::And, "age", Condition::between(18, 30)),
            pred(Conjunction::And, "name", Condition::like("jo%")),
        ]);
        assert_eq!(
            sql,
            "FIND_IN_SET(?, `tags`) AND `age` BETWEEN ? AND ? AND `name` LIKE ?"
        );
        assert_eq!(b.len(), 4);
        assert_eq!(b.values()[1], SqlValue::Int(18));
        assert_eq!(b.values()[2], SqlValue::Int(30));
    }

    #[test]
    fn test_fulltext() {
        let (sql, b) = run(&[pred(
            Conjunction::And,
            "title,body",
            Condition::fulltext("rust  (query) builder"),
        )]);
        assert_eq!(
            sql,
            "MATCH(`title`, `body`) AGAINST (? IN BOOLEAN MODE)"
        );
        assert_eq!(b.values()[0], SqlValue::Text("+rust* +query* +builder*".into()));
    }

    #[test]
    fn test_exists_ignores_key() {
        let sub = Fragment::new("SELECT 1 FROM `orders` WHERE `orders`.`user_id` = `u`.`id`");
        let (sql, _) = run(&[pred(Conjunction::And, "", Condition::Exists(sub))]);
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM `orders` WHERE `orders`.`user_id` = `u`.`id`)"
        );
    }

    #[test]
    fn test_expression_keys_pass_through() {
        let (sql, _) = run(&[pred(Conjunction::And, "DATE(created_at)", Condition::eq("2024-01-01"))]);
        assert_eq!(sql, "DATE(created_at) = ?");
    }

    #[test]
    fn test_raw_expr_clause() {
        let frag = Fragment::new("(`a` = ? OR `b` = ?)").bind(1).bind(2);
        let (sql, b) = run(&[
            pred(Conjunction::And, "c", Condition::eq(0)),
            Clause::Expr {
                conjunction: Conjunction::Or,
                fragment: frag,
            },
        ]);
        assert_eq!(sql, "`c` = ? OR (`a` = ? OR `b` = ?)");
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn test_parse_operators() {
        assert_eq!(
            Condition::parse(">=", Operand::from(5)).unwrap(),
            Condition::Compare(CompareOp::Gte, SqlValue::Int(5))
        );
        assert_eq!(
            Condition::parse("=", Operand::Value(SqlValue::Null)).unwrap(),
            Condition::IsNull
        );
        assert_eq!(
            Condition::parse("<>", Operand::Value(SqlValue::Null)).unwrap(),
            Condition::IsNotNull
        );
        assert_eq!(
            Condition::parse("NOT  IN", Operand::List(vec![SqlValue::Int(1)])).unwrap(),
            Condition::NotIn(vec![SqlValue::Int(1)])
        );
        assert_eq!(
            Condition::parse(
                "between",
                Operand::List(vec![SqlValue::Int(1), SqlValue::Int(9)])
            )
            .unwrap(),
            Condition::Between(SqlValue::Int(1), SqlValue::Int(9))
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            Condition::parse("~~", Operand::from(1)),
            Err(QueryError::InvalidOperator("~~".into()))
        );
        assert!(matches!(
            Condition::parse("between", Operand::from(1)),
            Err(QueryError::InvalidOperand { .. })
        ));
        assert!(matches!(
            Condition::parse("exists", Operand::from(1)),
            Err(QueryError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_group_depth() {
        assert_eq!(
            group_depth(&[Clause::Open(Conjunction::And), Clause::Close]),
            0
        );
        assert_eq!(group_depth(&[Clause::Open(Conjunction::And)]), 1);
        assert_eq!(group_depth(&[Clause::Close]), -1);
    }
}
