use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::{Param, Value};

/// SQL text plus its typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub sql: Cow<'static, str>,
    pub params: Vec<Param>,
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(sql: impl Into<Cow<'static, str>>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    pub fn bind(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_params(mut self, params: Vec<Param>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Rows destined for a staging table.
///
/// `table` is already quoted for the connection's dialect; `columns` are bare
/// column names in the order every row lists its values.
#[derive(Debug, Clone, Copy)]
pub struct BulkLoad<'a> {
    pub table: &'a str,
    pub columns: &'a [&'a str],
    pub rows: &'a [Vec<Value>],
    pub timeout: Option<Duration>,
}

/// The database-access boundary generated code and the bulk runtime run against.
///
/// A PostgreSQL implementation for sqlx connections and transactions ships
/// behind the `postgres` feature. SQL Server drivers plug in by implementing
/// this trait and reporting [`Dialect::SqlServer`].
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Dialect of the SQL this connection accepts.
    fn dialect(&self) -> Dialect;

    /// Whether statements run inside a caller-owned transaction.
    fn in_transaction(&self) -> bool;

    /// Executes a statement and returns the affected-row count.
    async fn execute(&mut self, command: Command) -> Result<u64>;

    /// Forward-only reader over the rows of a statement.
    fn fetch<'c>(&'c mut self, command: Command) -> BoxStream<'c, Result<Row>>;

    async fn fetch_all(&mut self, command: Command) -> Result<Vec<Row>> {
        self.fetch(command).try_collect().await
    }

    /// Loads rows into a table through the fastest mechanism the driver has.
    async fn bulk_load(&mut self, load: BulkLoad<'_>) -> Result<u64>;
}

/// Fails with [`Error::DialectMismatch`] unless `conn` speaks `expected`.
pub(crate) fn ensure_dialect(conn: &dyn Connection, expected: Dialect) -> Result<()> {
    let actual = conn.dialect();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::DialectMismatch { expected, actual })
    }
}

/// Runs `fut`, failing with [`Error::Timeout`] once `timeout` elapses.
pub async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_builder() {
        let cmd = Command::new("SELECT 1").with_timeout(Some(Duration::from_secs(3)));
        assert_eq!(cmd.sql, "SELECT 1");
        assert!(cmd.params.is_empty());
        assert_eq!(cmd.timeout, Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn with_timeout_elapses() {
        let result: Result<()> = with_timeout(Some(Duration::from_millis(5)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(with_timeout(None, async { Ok(7) }).await.ok(), Some(7));
    }
}
