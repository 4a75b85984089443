//! Error types for query building and execution.

use crate::builder::StatementKind;

/// An error returned by a [`Connection`](crate::Connection) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    /// Server or driver message.
    pub message: String,
    /// Server error code, when the driver exposes one.
    pub code: Option<u16>,
}

impl DriverError {
    /// Creates a driver error without an error code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attaches a server error code.
    #[must_use]
    pub const fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }
}

/// Errors raised while building or executing statements.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// A statement was started while another one is still in progress.
    #[error("cannot start {requested} while {active} is in progress")]
    StatementInProgress {
        /// Kind of the unfinished statement.
        active: StatementKind,
        /// Kind that was requested.
        requested: StatementKind,
    },

    /// An operator string that the condition compiler does not know.
    #[error("unknown operator '{0}'")]
    InvalidOperator(String),

    /// An operand whose shape does not fit its operator.
    #[error("operator '{operator}' expects {expected}")]
    InvalidOperand {
        /// The operator.
        operator: String,
        /// Description of the accepted operand shape.
        expected: &'static str,
    },

    /// An unknown join type.
    #[error("invalid join type '{0}'")]
    InvalidJoinType(String),

    /// An unknown ORDER BY direction.
    #[error("invalid order direction '{0}'")]
    InvalidOrderDirection(String),

    /// An unknown row lock mode.
    #[error("invalid lock mode '{0}'")]
    InvalidLockMode(String),

    /// An unknown filter operator or date period.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A `where_open()`/`where_close()` pair does not balance.
    #[error("unbalanced condition group")]
    UnbalancedGroup,

    /// The statement has no target table.
    #[error("{0} statement has no table")]
    MissingTable(StatementKind),

    /// INSERT/UPDATE/REPLACE without any column data.
    #[error("{0} statement has no data")]
    MissingData(StatementKind),

    /// A terminal call that does not apply to the statement kind.
    #[error("{operation}() is not available on {kind} statements")]
    UnsupportedTerminal {
        /// Statement kind.
        kind: StatementKind,
        /// The terminal operation that was called.
        operation: &'static str,
    },

    /// A clause the statement kind cannot express in MySQL.
    #[error("{clause} is not supported on {kind} statements")]
    UnsupportedClause {
        /// Statement kind.
        kind: StatementKind,
        /// The rejected clause.
        clause: &'static str,
    },

    /// `begin()` while a transaction is already open.
    #[error("a transaction is already active")]
    TransactionActive,

    /// `commit()`/`rollback()` without an open transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// The execution primitive reported a failure.
    #[error("query failed: {message}")]
    Execution {
        /// Driver message.
        message: String,
        /// Debug-rendered SQL of the failing statement.
        sql: String,
    },
}

impl QueryError {
    /// Short category name used when reporting to an error sink.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Execution { .. } => "query",
            Self::TransactionActive | Self::NoTransaction => "transaction",
            _ => "usage",
        }
    }

    /// Returns `true` for builder misuse (as opposed to server failures).
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        !matches!(self, Self::Execution { .. })
    }
}

impl From<std::convert::Infallible> for QueryError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

/// Result type alias for quarry-core operations.
pub type Result<T> = std::result::Result<T, QueryError>;
