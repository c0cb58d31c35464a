use std::future::Future;
use std::time::Instant;

use crate::connection::{BulkLoad, Command, Connection, ensure_dialect};
use crate::dialect::{Dialect, DialectMarker};
use crate::error::{Error, Result};
use crate::metrics::record_statement_metrics;
use crate::row::{FromRow, Row};
use crate::sql::batch_values;
use crate::value::{Param, Value};

/// SQL text generated for one model in one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySql {
    /// Qualified, quoted table name.
    pub table: &'static str,
    pub create: &'static str,
    pub insert: &'static str,
    /// Multi-row INSERT prefix, completed with [`batch_values`].
    pub insert_batch: &'static str,
    /// Parameters per row of `insert_batch`.
    pub insert_width: usize,
    pub update: Option<&'static str>,
    pub delete: Option<&'static str>,
    /// `DELETE .. IN ` prefix for single-key tables.
    pub delete_batch: Option<&'static str>,
    pub upsert: Option<&'static str>,
    pub truncate: &'static str,
    pub select: &'static str,
    pub find: Option<&'static str>,
}

/// Staging SQL for models that take part in bulk synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingSql {
    /// Quoted staging table name.
    pub table: &'static str,
    pub create: &'static str,
    /// Load order of staging columns; the last one is the op tag.
    pub columns: &'static [&'static str],
    pub apply: &'static str,
    pub apply_indexed: &'static str,
}

/// Rows per multi-row statement so that `rows * width` stays below `limit`.
pub fn rows_per_statement(limit: usize, width: usize) -> usize {
    if width == 0 {
        return 1;
    }
    (limit.saturating_sub(1) / width).max(1)
}

#[tracing::instrument(skip(conn, command), fields(table = %table))]
pub(crate) async fn execute_statement(
    conn: &mut dyn Connection,
    dialect: Dialect,
    operation: &'static str,
    table: &'static str,
    command: Command,
) -> Result<u64> {
    ensure_dialect(conn, dialect)?;
    #[cfg(debug_assertions)]
    tracing::debug!(
        operation,
        sql = %command.sql,
        params = command.params.len(),
        "bulkgen statement"
    );
    let start = Instant::now();
    let affected = conn.execute(command).await?;
    record_statement_metrics(operation, table, start.elapsed());
    Ok(affected)
}

#[tracing::instrument(skip(conn, command), fields(table = %table))]
pub(crate) async fn fetch_statement(
    conn: &mut dyn Connection,
    dialect: Dialect,
    operation: &'static str,
    table: &'static str,
    command: Command,
) -> Result<Vec<Row>> {
    ensure_dialect(conn, dialect)?;
    #[cfg(debug_assertions)]
    tracing::debug!(
        operation,
        sql = %command.sql,
        params = command.params.len(),
        "bulkgen query"
    );
    let start = Instant::now();
    let rows = conn.fetch_all(command).await?;
    record_statement_metrics(operation, table, start.elapsed());
    Ok(rows)
}

pub(crate) async fn load_rows(
    conn: &mut dyn Connection,
    table: &'static str,
    load: BulkLoad<'_>,
) -> Result<u64> {
    #[cfg(debug_assertions)]
    tracing::debug!(
        operation = "bulk_load",
        staging = load.table,
        rows = load.rows.len(),
        "bulkgen load"
    );
    let start = Instant::now();
    let loaded = conn.bulk_load(load).await?;
    record_statement_metrics("bulk_load", table, start.elapsed());
    Ok(loaded)
}

/// Renames params to the positional names of a batch statement, starting at `start`.
fn positional(dialect: Dialect, params: Vec<Param>, start: usize) -> impl Iterator<Item = Param> {
    params
        .into_iter()
        .enumerate()
        .map(move |(i, p)| p.renamed(dialect.positional_name(start + i)))
}

fn unsupported(operation: &'static str, table: &'static str) -> Error {
    Error::Unsupported { operation, table }
}

/// Generated single-row and batched operations of a model in dialect `D`.
///
/// Implementations come from the generator; every provided method checks the
/// connection dialect before any I/O.
pub trait Entity<D: DialectMarker>: Sized + Send + Sync {
    fn sql() -> &'static EntitySql;

    /// Values for `insert` and `insert_batch`, in insert column order.
    fn insert_params(&self) -> Vec<Param>;

    /// Values for `update`: settable columns followed by keys.
    fn update_params(&self) -> Vec<Param>;

    /// Key values, in key order.
    fn key_params(&self) -> Vec<Param>;

    fn create_table(conn: &mut dyn Connection) -> impl Future<Output = Result<()>> + Send {
        async move {
            let sql = Self::sql();
            execute_statement(conn, D::DIALECT, "create", sql.table, Command::new(sql.create))
                .await
                .map(|_| ())
        }
    }

    fn insert(&self, conn: &mut dyn Connection) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let sql = Self::sql();
            let command = Command::new(sql.insert).with_params(self.insert_params());
            execute_statement(conn, D::DIALECT, "insert", sql.table, command).await
        }
    }

    /// Inserts `items` with multi-row statements, split so each stays under the
    /// dialect's parameter ceiling and its `VALUES` row cap.
    fn insert_many<'a>(
        items: &'a [Self],
        conn: &'a mut dyn Connection,
    ) -> impl Future<Output = Result<u64>> + Send + 'a {
        async move {
            let sql = Self::sql();
            let dialect = D::DIALECT;
            ensure_dialect(conn, dialect)?;
            let per_statement = dialect.batch_rows(dialect.parameter_limit(), sql.insert_width);
            let mut inserted = 0;
            for chunk in items.chunks(per_statement) {
                let values = batch_values(dialect, chunk.len(), sql.insert_width, 1);
                let mut params = Vec::with_capacity(chunk.len() * sql.insert_width);
                for item in chunk {
                    let start = params.len() + 1;
                    params.extend(positional(dialect, item.insert_params(), start));
                }
                let command = Command::new(format!("{}{}", sql.insert_batch, values)).with_params(params);
                inserted += execute_statement(conn, dialect, "insert_many", sql.table, command).await?;
            }
            Ok(inserted)
        }
    }

    fn update(&self, conn: &mut dyn Connection) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let sql = Self::sql();
            let text = sql.update.ok_or_else(|| unsupported("update", sql.table))?;
            let command = Command::new(text).with_params(self.update_params());
            execute_statement(conn, D::DIALECT, "update", sql.table, command).await
        }
    }

    fn delete(&self, conn: &mut dyn Connection) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let sql = Self::sql();
            let text = sql.delete.ok_or_else(|| unsupported("delete", sql.table))?;
            let command = Command::new(text).with_params(self.key_params());
            execute_statement(conn, D::DIALECT, "delete", sql.table, command).await
        }
    }

    /// Deletes `items` by key with `IN` lists split under the parameter ceiling.
    fn delete_many<'a>(
        items: &'a [Self],
        conn: &'a mut dyn Connection,
    ) -> impl Future<Output = Result<u64>> + Send + 'a {
        async move {
            let sql = Self::sql();
            let dialect = D::DIALECT;
            let prefix = sql
                .delete_batch
                .ok_or_else(|| unsupported("delete_many", sql.table))?;
            ensure_dialect(conn, dialect)?;
            let per_statement = rows_per_statement(dialect.parameter_limit(), 1);
            let mut deleted = 0;
            for chunk in items.chunks(per_statement) {
                let keys: Vec<Param> = chunk.iter().flat_map(|item| item.key_params()).collect();
                let values = batch_values(dialect, 1, keys.len(), 1);
                let command = Command::new(format!("{}{}", prefix, values))
                    .with_params(positional(dialect, keys, 1).collect());
                deleted += execute_statement(conn, dialect, "delete_many", sql.table, command).await?;
            }
            Ok(deleted)
        }
    }

    fn upsert(&self, conn: &mut dyn Connection) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let sql = Self::sql();
            let text = sql.upsert.ok_or_else(|| unsupported("upsert", sql.table))?;
            let command = Command::new(text).with_params(self.insert_params());
            execute_statement(conn, D::DIALECT, "upsert", sql.table, command).await
        }
    }

    fn truncate(conn: &mut dyn Connection) -> impl Future<Output = Result<()>> + Send {
        async move {
            let sql = Self::sql();
            execute_statement(conn, D::DIALECT, "truncate", sql.table, Command::new(sql.truncate))
                .await
                .map(|_| ())
        }
    }

    /// Loads the row matching `key`, bound in key order.
    fn find(
        conn: &mut dyn Connection,
        key: Vec<Param>,
    ) -> impl Future<Output = Result<Option<Self>>> + Send
    where
        Self: FromRow,
    {
        async move {
            let sql = Self::sql();
            let text = sql.find.ok_or_else(|| unsupported("find", sql.table))?;
            let rows =
                fetch_statement(conn, D::DIALECT, "find", sql.table, Command::new(text).with_params(key))
                    .await?;
            rows.first().map(Self::from_row).transpose()
        }
    }

    fn all(conn: &mut dyn Connection) -> impl Future<Output = Result<Vec<Self>>> + Send
    where
        Self: FromRow,
    {
        async move {
            let sql = Self::sql();
            let rows =
                fetch_statement(conn, D::DIALECT, "select", sql.table, Command::new(sql.select)).await?;
            rows.iter().map(Self::from_row).collect()
        }
    }
}

/// Generated staging support for models that implement `BulkModel`.
pub trait BulkEntity<D: DialectMarker>: Entity<D> {
    fn staging() -> &'static StagingSql;

    /// Values in staging column order, without the op tag.
    fn staging_row(&self) -> Vec<Value>;
}
