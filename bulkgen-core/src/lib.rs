//! Runtime half of bulkgen.
//!
//! Generated code implements [`Entity`], [`BulkEntity`] and [`FromRow`] for
//! user models and runs through the [`Connection`] boundary. The same crate
//! holds the SQL text builder the generator calls at build time.

pub use async_trait;
pub use chrono;
pub use rust_decimal;
pub use sqlx;
pub use uuid;
pub use tokio_util::sync::CancellationToken;

pub mod bulk;
pub mod connection;
pub mod dialect;
pub mod entity;
pub mod error;
mod metrics;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod profile;
pub mod row;
pub mod sql;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod value;

pub use bulk::{BulkBatch, BulkOperation, OperationKind, SyncCounts, SyncOptions, SyncStrategy};
pub use connection::{BulkLoad, Command, Connection};
pub use dialect::{Dialect, DialectMarker, DialectSpec, OP_COLUMN, Postgres, SqlServer, UpsertStrategy};
pub use entity::{BulkEntity, Entity, EntitySql, StagingSql, rows_per_statement};
pub use error::{Error, Result};
pub use profile::{
    BulkModel, DomainModel, PostgresProfile, ProfileBuilder, PropertyRule, ResultModel,
    SqlServerProfile,
};
pub use row::{FromRow, Row};
pub use types::{ColumnSize, DbType, PostgresType, SqlServerType, TypeFamily};
pub use value::{FromValue, Param, ParamSpec, Value};

pub mod prelude {
    pub use crate::{
        BulkBatch, BulkEntity, BulkModel, Connection, DomainModel, Entity, FromRow, PostgresProfile,
        PostgresType, ProfileBuilder, ResultModel, SqlServerProfile, SqlServerType, SyncCounts,
        SyncOptions,
    };
    pub use crate::dialect::{Postgres, SqlServer};
}
