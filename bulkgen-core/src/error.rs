use std::time::Duration;

use crate::dialect::Dialect;

/// Runtime error for generated operations and bulk synchronization.
///
/// Driver failures pass through untouched; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying sqlx error.
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// Error raised by a third-party [`Connection`](crate::Connection) implementation.
    #[error("driver error: {0}")]
    Driver(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The operation stages rows and must run inside a caller-owned transaction.
    #[error("`{operation}` requires an open transaction")]
    TransactionRequired { operation: &'static str },
    /// Generated SQL for one dialect was handed a connection for another.
    #[error("statement generated for {expected} cannot run on a {actual} connection")]
    DialectMismatch { expected: Dialect, actual: Dialect },
    /// The cancellation token fired between statements.
    #[error("operation cancelled")]
    Cancelled,
    /// A statement exceeded its timeout.
    #[error("statement timed out after {0:?}")]
    Timeout(Duration),
    /// The generated SQL has no statement for this operation.
    #[error("`{operation}` is not available for table {table}")]
    Unsupported {
        operation: &'static str,
        table: &'static str,
    },
    /// A column could not be converted into the model's field type.
    #[error("cannot decode column `{column}`: {message}")]
    Decode { column: String, message: String },
    /// The apply statement finished without reporting its counts.
    #[error("apply statement returned no counts")]
    MissingCounts,
}

impl Error {
    /// Wraps an arbitrary driver error.
    pub fn driver(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Driver(Box::new(err))
    }
}

/// Result alias for bulkgen operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
