//! [`Connection`] for sqlx PostgreSQL connections and transactions.

use std::fmt::Write;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column as _, Row as _, TypeInfo as _};

use crate::connection::{BulkLoad, Command, Connection, with_timeout};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::types::{DbType, PostgresType, TypeFamily};
use crate::value::{Param, Value};

/// Bytes buffered before a COPY chunk is sent.
const COPY_CHUNK: usize = 1 << 20;

type PgQuery<'q> = Query<'q, sqlx::Postgres, PgArguments>;

fn bind_param(query: PgQuery<'_>, param: Param) -> PgQuery<'_> {
    match param.value {
        Value::Null => bind_null(query, param.db_type),
        Value::Bool(v) => query.bind(v),
        Value::I16(v) => query.bind(v),
        Value::I32(v) => query.bind(v),
        Value::I64(v) => query.bind(v),
        Value::F32(v) => query.bind(v),
        Value::F64(v) => query.bind(v),
        Value::Decimal(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
        Value::Bytes(v) => query.bind(v),
        Value::Uuid(v) => query.bind(v),
        Value::Date(v) => query.bind(v),
        Value::Time(v) => query.bind(v),
        Value::DateTime(v) => query.bind(v),
        Value::DateTimeUtc(v) => query.bind(v),
    }
}

/// NULL carrying the parameter's declared type so the server can infer it.
fn bind_null(query: PgQuery<'_>, db_type: DbType) -> PgQuery<'_> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let DbType::Postgres(ty) = db_type else {
        return match db_type.family() {
            TypeFamily::Boolean => query.bind(None::<bool>),
            TypeFamily::Integer => query.bind(None::<i64>),
            TypeFamily::Float => query.bind(None::<f64>),
            TypeFamily::Decimal => query.bind(None::<rust_decimal::Decimal>),
            TypeFamily::Binary => query.bind(None::<Vec<u8>>),
            TypeFamily::Uuid => query.bind(None::<uuid::Uuid>),
            TypeFamily::Text | TypeFamily::Temporal => query.bind(None::<String>),
        };
    };
    match ty {
        PostgresType::Boolean => query.bind(None::<bool>),
        PostgresType::SmallInt => query.bind(None::<i16>),
        PostgresType::Integer => query.bind(None::<i32>),
        PostgresType::BigInt => query.bind(None::<i64>),
        PostgresType::Real => query.bind(None::<f32>),
        PostgresType::DoublePrecision => query.bind(None::<f64>),
        PostgresType::Numeric => query.bind(None::<rust_decimal::Decimal>),
        PostgresType::Char | PostgresType::VarChar | PostgresType::Text => query.bind(None::<String>),
        PostgresType::Bytea => query.bind(None::<Vec<u8>>),
        PostgresType::Date => query.bind(None::<NaiveDate>),
        PostgresType::Time => query.bind(None::<NaiveTime>),
        PostgresType::Timestamp => query.bind(None::<NaiveDateTime>),
        PostgresType::TimestampTz => query.bind(None::<DateTime<Utc>>),
        PostgresType::Uuid => query.bind(None::<uuid::Uuid>),
    }
}

fn decode_column<'r, T>(row: &'r PgRow, index: usize) -> Result<Value>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Into<Value>,
{
    let value: Option<T> = row.try_get(index)?;
    Ok(value.into())
}

fn decode_row(row: &PgRow, columns: &Arc<[String]>) -> Result<Row> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => decode_column::<bool>(row, index)?,
            "INT2" => decode_column::<i16>(row, index)?,
            "INT4" => decode_column::<i32>(row, index)?,
            "INT8" => decode_column::<i64>(row, index)?,
            "FLOAT4" => decode_column::<f32>(row, index)?,
            "FLOAT8" => decode_column::<f64>(row, index)?,
            "NUMERIC" => decode_column::<rust_decimal::Decimal>(row, index)?,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => decode_column::<String>(row, index)?,
            "BYTEA" => decode_column::<Vec<u8>>(row, index)?,
            "UUID" => decode_column::<uuid::Uuid>(row, index)?,
            "DATE" => decode_column::<NaiveDate>(row, index)?,
            "TIME" => decode_column::<NaiveTime>(row, index)?,
            "TIMESTAMP" => decode_column::<NaiveDateTime>(row, index)?,
            "TIMESTAMPTZ" => decode_column::<DateTime<Utc>>(row, index)?,
            other => {
                return Err(Error::Decode {
                    column: column.name().to_owned(),
                    message: format!("unsupported column type {}", other),
                });
            }
        };
        values.push(value);
    }
    Ok(Row::new(columns.clone(), values))
}

fn column_names(row: &PgRow) -> Arc<[String]> {
    row.columns().iter().map(|c| c.name().to_owned()).collect()
}

/// Parameterless multi-statement text goes through the simple query protocol.
fn is_script(command: &Command) -> bool {
    command.params.is_empty() && command.sql.trim_end().trim_end_matches(';').contains(';')
}

async fn execute_on(conn: &mut PgConnection, command: Command) -> Result<u64> {
    let timeout = command.timeout;
    with_timeout(timeout, async move {
        let result = if is_script(&command) {
            sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&command.sql)).await?
        } else {
            let Command { sql, params, .. } = command;
            sqlx::Executor::execute(&mut *conn, params.into_iter().fold(sqlx::query(&sql), bind_param)).await?
        };
        Ok(result.rows_affected())
    })
    .await
}

fn fetch_on(conn: &mut PgConnection, command: Command) -> BoxStream<'_, Result<Row>> {
    Box::pin(async_stream::try_stream! {
        let script = is_script(&command);
        let Command { sql, params, .. } = command;
        let mut rows = if script {
            sqlx::raw_sql(&sql).fetch(&mut *conn)
        } else {
            params.into_iter().fold(sqlx::query(&sql), bind_param).fetch(&mut *conn)
        };
        let mut columns: Option<Arc<[String]>> = None;
        while let Some(row) = rows.next().await {
            let row = row?;
            let names = columns.get_or_insert_with(|| column_names(&row));
            yield decode_row(&row, names)?;
        }
    })
}

async fn fetch_all_on(conn: &mut PgConnection, command: Command) -> Result<Vec<Row>> {
    let timeout = command.timeout;
    with_timeout(timeout, fetch_on(conn, command).try_collect()).await
}

/// Appends one CSV field in the text form `COPY .. (FORMAT csv)` reads.
fn write_csv_field(out: &mut String, value: &Value) {
    fn quoted(out: &mut String, text: &str) {
        out.push('"');
        for c in text.chars() {
            if c == '"' {
                out.push('"');
            }
            out.push(c);
        }
        out.push('"');
    }
    fn float(out: &mut String, v: f64) {
        if v.is_nan() {
            out.push_str("NaN");
        } else if v.is_infinite() {
            out.push_str(if v > 0.0 { "Infinity" } else { "-Infinity" });
        } else {
            let _ = write!(out, "{}", v);
        }
    }

    match value {
        Value::Null => {}
        Value::Bool(v) => out.push(if *v { 't' } else { 'f' }),
        Value::I16(v) => {
            let _ = write!(out, "{}", v);
        }
        Value::I32(v) => {
            let _ = write!(out, "{}", v);
        }
        Value::I64(v) => {
            let _ = write!(out, "{}", v);
        }
        Value::F32(v) => float(out, f64::from(*v)),
        Value::F64(v) => float(out, *v),
        Value::Decimal(v) => {
            let _ = write!(out, "{}", v);
        }
        Value::Text(v) => quoted(out, v),
        Value::Bytes(v) => {
            out.push_str("\\x");
            for byte in v {
                let _ = write!(out, "{:02x}", byte);
            }
        }
        Value::Uuid(v) => {
            let _ = write!(out, "{}", v);
        }
        Value::Date(v) => {
            let _ = write!(out, "{}", v);
        }
        Value::Time(v) => {
            let _ = write!(out, "{}", v);
        }
        Value::DateTime(v) => {
            let _ = write!(out, "{}", v);
        }
        Value::DateTimeUtc(v) => out.push_str(&v.to_rfc3339()),
    }
}

fn write_csv_row(out: &mut String, row: &[Value]) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_csv_field(out, value);
    }
    out.push('\n');
}

async fn copy_in(conn: &mut PgConnection, load: BulkLoad<'_>) -> Result<u64> {
    let columns = load
        .columns
        .iter()
        .map(|c| Dialect::Postgres.quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    let statement = format!("COPY {} ({}) FROM STDIN (FORMAT csv)", load.table, columns);
    with_timeout(load.timeout, async move {
        let mut copy = conn.copy_in_raw(&statement).await?;
        let mut buf = String::with_capacity(COPY_CHUNK);
        for row in load.rows {
            write_csv_row(&mut buf, row);
            if buf.len() >= COPY_CHUNK {
                copy.send(std::mem::take(&mut buf).into_bytes()).await?;
            }
        }
        if !buf.is_empty() {
            copy.send(buf.into_bytes()).await?;
        }
        Ok(copy.finish().await?)
    })
    .await
}

/// A bare connection runs in autocommit mode; bulk synchronization needs a
/// [`sqlx::Transaction`].
#[async_trait::async_trait]
impl Connection for PgConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn in_transaction(&self) -> bool {
        false
    }

    async fn execute(&mut self, command: Command) -> Result<u64> {
        execute_on(self, command).await
    }

    fn fetch<'c>(&'c mut self, command: Command) -> BoxStream<'c, Result<Row>> {
        fetch_on(self, command)
    }

    async fn fetch_all(&mut self, command: Command) -> Result<Vec<Row>> {
        fetch_all_on(self, command).await
    }

    async fn bulk_load(&mut self, load: BulkLoad<'_>) -> Result<u64> {
        copy_in(self, load).await
    }
}

#[async_trait::async_trait]
impl<'t> Connection for sqlx::Transaction<'t, sqlx::Postgres> {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn in_transaction(&self) -> bool {
        true
    }

    async fn execute(&mut self, command: Command) -> Result<u64> {
        execute_on(&mut **self, command).await
    }

    fn fetch<'c>(&'c mut self, command: Command) -> BoxStream<'c, Result<Row>> {
        fetch_on(&mut **self, command)
    }

    async fn fetch_all(&mut self, command: Command) -> Result<Vec<Row>> {
        fetch_all_on(&mut **self, command).await
    }

    async fn bulk_load(&mut self, load: BulkLoad<'_>) -> Result<u64> {
        copy_in(&mut **self, load).await
    }
}
