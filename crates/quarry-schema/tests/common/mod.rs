#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use quarry_core::{Bindings, Connection, Database, DriverError, Escape, QueryOutput, Row, SqlValue};

/// One statement as the connection received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

struct Rule {
    pattern: String,
    replies: VecDeque<Result<QueryOutput, DriverError>>,
}

#[derive(Default)]
struct Inner {
    executed: Vec<Executed>,
    rules: Vec<Rule>,
}

/// A connection that answers by SQL pattern.
///
/// Each pattern holds a queue of replies; a statement containing the
/// pattern takes the next reply, and the last one repeats. The first
/// registered pattern wins. Anything else succeeds with an empty result.
#[derive(Clone, Default)]
pub struct ScriptedServer {
    inner: Rc<RefCell<Inner>>,
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, pattern: &str, reply: Result<QueryOutput, DriverError>) {
        let mut inner = self.inner.borrow_mut();
        if let Some(rule) = inner.rules.iter_mut().find(|r| r.pattern == pattern) {
            rule.replies.push_back(reply);
        } else {
            inner.rules.push(Rule {
                pattern: pattern.to_string(),
                replies: VecDeque::from([reply]),
            });
        }
    }

    pub fn on_rows(&self, pattern: &str, rows: Vec<Row>) {
        self.on(pattern, Ok(QueryOutput::rows(rows)));
    }

    pub fn on_error(&self, pattern: &str, message: &str) {
        self.on(pattern, Err(DriverError::new(message).with_code(1105)));
    }

    /// Scripts the `information_schema` existence check.
    pub fn table_count(&self, count: i64) {
        self.on_rows("COUNT(*)", vec![row(&[("count", SqlValue::Int(count))])]);
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.inner.borrow().executed.clone()
    }

    pub fn sql_log(&self) -> Vec<String> {
        self.inner
            .borrow()
            .executed
            .iter()
            .map(|e| e.sql.clone())
            .collect()
    }

    /// Statements other than metadata reads and row selects.
    pub fn writes(&self) -> Vec<String> {
        self.sql_log()
            .into_iter()
            .filter(|sql| !sql.starts_with("SELECT") && !sql.starts_with("SHOW"))
            .collect()
    }
}

impl Escape for ScriptedServer {}

impl Connection for ScriptedServer {
    fn execute(&mut self, sql: &str, params: &Bindings) -> Result<QueryOutput, DriverError> {
        let mut inner = self.inner.borrow_mut();
        inner.executed.push(Executed {
            sql: sql.to_string(),
            values: params.values().to_vec(),
        });
        let Some(rule) = inner.rules.iter_mut().find(|r| sql.contains(&r.pattern)) else {
            return Ok(QueryOutput::default());
        };
        if rule.replies.len() > 1 {
            rule.replies
                .pop_front()
                .unwrap_or_else(|| Ok(QueryOutput::default()))
        } else {
            rule.replies
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(QueryOutput::default()))
        }
    }
}

pub fn setup() -> (Database<ScriptedServer>, ScriptedServer) {
    let server = ScriptedServer::new();
    (Database::new(server.clone()), server)
}

pub fn row(pairs: &[(&str, SqlValue)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

pub fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

/// One row of `SHOW FULL COLUMNS`.
pub fn column_row(
    field: &str,
    column_type: &str,
    nullable: bool,
    key: &str,
    default: Option<&str>,
    extra: &str,
) -> Row {
    let collation = if column_type.starts_with("varchar") || column_type.starts_with("text") {
        text("utf8mb4_unicode_ci")
    } else {
        SqlValue::Null
    };
    row(&[
        ("Field", text(field)),
        ("Type", text(column_type)),
        ("Collation", collation),
        ("Null", text(if nullable { "YES" } else { "NO" })),
        ("Key", text(key)),
        ("Default", default.map_or(SqlValue::Null, text)),
        ("Extra", text(extra)),
        ("Comment", text("")),
    ])
}

/// One row of `SHOW INDEX`.
pub fn index_row(name: &str, seq: i64, column: &str, unique: bool) -> Row {
    row(&[
        ("Key_name", text(name)),
        ("Seq_in_index", SqlValue::Int(seq)),
        ("Column_name", text(column)),
        ("Non_unique", SqlValue::Int(i64::from(!unique))),
        ("Index_type", text("BTREE")),
    ])
}

/// Scripts a live `users (id int auto_increment primary, name varchar(50))`
/// table.
pub fn live_users(server: &ScriptedServer) {
    server.table_count(1);
    server.on_rows(
        "SHOW FULL COLUMNS",
        vec![
            column_row("id", "int", false, "PRI", None, "auto_increment"),
            column_row("name", "varchar(50)", false, "", Some(""), ""),
        ],
    );
    server.on_rows("SHOW INDEX", vec![index_row("PRIMARY", 1, "id", true)]);
    server.on_rows("TABLE_COMMENT", vec![row(&[("TABLE_COMMENT", text(""))])]);
}

/// The declared counterpart of [`live_users`].
pub const USERS_SCHEMA: &str = r#"{
    "columns": {
        "id": {"type": "int", "auto_increment": true},
        "name": {"type": "varchar", "length": 50, "default": ""}
    },
    "indexes": {"id": "primary_key"}
}"#;
