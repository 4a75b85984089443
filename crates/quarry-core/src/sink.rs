//! Error reporting side channel.

/// Context attached to a reported error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Debug-rendered SQL of the statement involved, if any.
    pub sql: Option<String>,
    /// The driver's original message, if the error came from the server.
    pub original_error: Option<String>,
}

/// Receives every error the database handle records.
///
/// Fire-and-forget: nothing depends on what the sink does with a report.
pub trait ErrorSink {
    /// Reports one error.
    fn report(&self, kind: &str, message: &str, context: &ErrorContext);
}

impl<F> ErrorSink for F
where
    F: Fn(&str, &str, &ErrorContext),
{
    fn report(&self, kind: &str, message: &str, context: &ErrorContext) {
        self(kind, message, context);
    }
}

/// Default sink: logs through `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, kind: &str, message: &str, context: &ErrorContext) {
        tracing::error!(
            kind,
            sql = context.sql.as_deref().unwrap_or(""),
            original_error = context.original_error.as_deref().unwrap_or(""),
            "{message}"
        );
    }
}
