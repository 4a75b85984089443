#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use quarry_core::{
    Bindings, Connection, Database, DriverError, ErrorContext, Escape, QueryOutput, Row, SqlValue,
};

/// One statement as the connection received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub values: Vec<SqlValue>,
    pub types: String,
}

#[derive(Default)]
struct Inner {
    executed: Vec<Executed>,
    replies: VecDeque<Result<QueryOutput, DriverError>>,
}

/// A connection that records every statement and answers from a script.
///
/// Clones share the same log, so a test can keep a handle after moving the
/// connection into a `Database`. Unscripted statements succeed with an
/// empty result.
#[derive(Clone, Default)]
pub struct FakeConnection {
    inner: Rc<RefCell<Inner>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_rows(&self, rows: Vec<Row>) {
        self.inner
            .borrow_mut()
            .replies
            .push_back(Ok(QueryOutput::rows(rows)));
    }

    pub fn reply_affected(&self, affected_rows: u64, insert_id: u64) {
        self.inner.borrow_mut().replies.push_back(Ok(QueryOutput {
            affected_rows,
            insert_id,
            rows: Vec::new(),
        }));
    }

    pub fn reply_error(&self, message: &str) {
        self.inner
            .borrow_mut()
            .replies
            .push_back(Err(DriverError::new(message).with_code(1064)));
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

    pub fn last(&self) -> Executed {
        self.inner
            .borrow()
            .executed
            .last()
            .cloned()
            .unwrap_or_else(|| panic!("no statement was executed"))
    }
}

impl Escape for FakeConnection {}

impl Connection for FakeConnection {
    fn execute(&mut self, sql: &str, params: &Bindings) -> Result<QueryOutput, DriverError> {
        let mut inner = self.inner.borrow_mut();
        inner.executed.push(Executed {
            sql: sql.to_string(),
            values: params.values().to_vec(),
            types: params.type_string(),
        });
        inner.replies.pop_front().unwrap_or_else(|| Ok(QueryOutput::default()))
    }
}

/// Reports captured by [`capture_sink`].
pub type Reports = Rc<RefCell<Vec<(String, String, ErrorContext)>>>;

/// A database over a fresh fake connection plus a handle to its log and
/// the error reports.
pub fn setup() -> (Database<FakeConnection>, FakeConnection, Reports) {
    let conn = FakeConnection::new();
    let reports: Reports = Rc::default();
    let sink_reports = Rc::clone(&reports);
    let db = Database::new(conn.clone()).with_sink(
        move |kind: &str, message: &str, context: &ErrorContext| {
            sink_reports
                .borrow_mut()
                .push((kind.to_string(), message.to_string(), context.clone()));
        },
    );
    (db, conn, reports)
}

/// Builds a row from column/value pairs.
pub fn row(pairs: &[(&str, SqlValue)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}
