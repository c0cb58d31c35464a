use std::time::Duration;

use bulkgen::chrono::{NaiveDate, NaiveDateTime};
use bulkgen::prelude::*;
use bulkgen::rust_decimal::Decimal;
use bulkgen::uuid::Uuid;
use bulkgen::{Dialect, DialectMarker, Error, Row, SyncStrategy, Value};
use bulkgen_core::test_utils::{MockConnection, MockTable};
use bulkgen_demo::models::{Customer, Order, OrderStatus, Reading, StatusTotal};
use bulkgen_demo::{
    customer_sql_server, order_postgres, order_sql_server, reading_postgres, reading_sql_server,
};
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(hour % 24, 0, 0)
        .unwrap()
}

fn order(id: i32, customer: &str) -> Order {
    Order {
        id,
        customer: customer.to_owned(),
        status: OrderStatus::Pending,
        total: Decimal::new(1999, 2),
        note: None,
        placed_at: at(id as u32),
    }
}

fn reading(sensor: i32, hour: u32) -> Reading {
    Reading {
        sensor,
        taken_at: at(hour),
        value: 21.5,
    }
}

fn orders_sql_server() -> MockConnection {
    MockConnection::new(
        Dialect::SqlServer,
        MockTable::new(
            "[sales].[Orders]",
            &["id", "CustomerName", "status", "total", "note", "PlacedAt"],
            &["id"],
        ),
    )
}

fn orders_postgres() -> MockConnection {
    MockConnection::new(
        Dialect::Postgres,
        MockTable::new(
            "\"sales\".\"Orders\"",
            &["id", "customer_name", "status", "total", "note", "placed_at"],
            &["id"],
        ),
    )
}

/// Ten seeded orders; the batch adds five, updates five and removes five.
fn mixed_batch() -> BulkBatch<Order> {
    let mut batch = BulkBatch::new();
    for id in 11..=15 {
        batch.add(order(id, "new"));
    }
    for id in 1..=5 {
        let mut changed = order(id, "changed");
        changed.status = OrderStatus::Shipped;
        changed.note = Some("expedite".to_owned());
        batch.update(changed);
    }
    for id in 6..=10 {
        batch.remove(order(id, ""));
    }
    batch
}

fn seed() -> Vec<Order> {
    (1..=10).map(|id| order(id, "seed")).collect()
}

fn assert_synced(mut rows: Vec<Order>) {
    rows.sort_by_key(|o| o.id);
    let ids: Vec<i32> = rows.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 11, 12, 13, 14, 15]);
    assert!(rows[..5].iter().all(|o| o.customer == "changed"
        && o.status == OrderStatus::Shipped
        && o.note.as_deref() == Some("expedite")));
    assert!(rows[5..].iter().all(|o| o.customer == "new" && o.note.is_none()));
}

#[tokio::test]
async fn staged_sync_round_trip_sql_server() {
    init_tracing();
    let mut conn = orders_sql_server();
    let seeded = <Order as Entity<SqlServer>>::insert_many(&seed(), &mut conn).await.unwrap();
    assert_eq!(seeded, 10);
    conn.clear_statements();

    let batch = mixed_batch();
    let options = SyncOptions::default();
    assert_eq!(batch.plan::<SqlServer>(&options), SyncStrategy::Staging { indexed: false });
    let counts = batch.apply::<SqlServer>(&mut conn, &options).await.unwrap();
    assert_eq!(
        counts,
        SyncCounts {
            inserted: 5,
            updated: 5,
            deleted: 5
        }
    );

    let statements = conn.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].starts_with("CREATE TABLE [#Orders_bulk]"));
    assert_eq!(statements[1], "COPY [#Orders_bulk]");
    assert!(statements[2].contains("DROP TABLE [#Orders_bulk]"));
    assert_eq!(conn.loaded_rows(), 15);
    assert!(conn.staging_tables().is_empty());

    let rows = <Order as Entity<SqlServer>>::all(&mut conn).await.unwrap();
    assert_synced(rows);
}

#[tokio::test]
async fn staged_sync_round_trip_postgres() {
    let mut conn = orders_postgres();
    <Order as Entity<Postgres>>::insert_many(&seed(), &mut conn).await.unwrap();
    conn.clear_statements();

    let counts = mixed_batch()
        .apply::<Postgres>(&mut conn, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(counts.total(), 15);
    assert_eq!((counts.inserted, counts.updated, counts.deleted), (5, 5, 5));
    assert!(conn.statements()[0].starts_with("CREATE TEMP TABLE \"Orders_bulk\""));
    assert!(conn.statements()[2].contains("WITH ins AS"));

    let rows = <Order as Entity<Postgres>>::all(&mut conn).await.unwrap();
    assert_synced(rows);
}

async fn truncate_then_apply<D>(
    conn: &mut MockConnection,
    batch: &BulkBatch<Order>,
    options: &SyncOptions,
) -> Vec<Order>
where
    D: DialectMarker,
    Order: BulkEntity<D>,
{
    <Order as Entity<D>>::truncate(conn).await.unwrap();
    assert!(conn.table().rows().is_empty());
    let counts = batch.apply::<D>(conn, options).await.unwrap();
    assert_eq!(counts.inserted, batch.len() as u64);
    assert_eq!(counts.updated + counts.deleted, 0);
    let mut rows = <Order as Entity<D>>::all(conn).await.unwrap();
    rows.sort_by_key(|o| o.id);
    rows
}

fn insert_only_batch() -> BulkBatch<Order> {
    let mut batch = BulkBatch::new();
    for id in 1..=20 {
        let mut placed = order(id, &format!("customer {}", id));
        placed.note = (id % 3 == 0).then(|| "gift".to_owned());
        batch.add(placed);
    }
    batch
}

#[tokio::test]
async fn reapplying_after_truncate_is_idempotent() {
    let batch = insert_only_batch();
    // The lowered ceiling forces the staged path for the same batch.
    let strategies = [SyncOptions::default(), SyncOptions::default().with_parameter_limit(10)];
    for options in &strategies {
        let mut conn = orders_sql_server();
        <Order as Entity<SqlServer>>::insert_many(&seed(), &mut conn).await.unwrap();
        let first = truncate_then_apply::<SqlServer>(&mut conn, &batch, options).await;
        let second = truncate_then_apply::<SqlServer>(&mut conn, &batch, options).await;
        assert_eq!(first.len(), 20);
        assert_eq!(first, second);

        let mut conn = orders_postgres();
        <Order as Entity<Postgres>>::insert_many(&seed(), &mut conn).await.unwrap();
        let first = truncate_then_apply::<Postgres>(&mut conn, &batch, options).await;
        let second = truncate_then_apply::<Postgres>(&mut conn, &batch, options).await;
        assert_eq!(first.len(), 20);
        assert_eq!(first, second);
    }
}

#[test]
fn fast_path_boundary_follows_the_parameter_ceiling() {
    let options = SyncOptions::default();
    let mut batch = BulkBatch::new();
    for i in 0..699 {
        batch.add(reading(i, 0));
    }
    // 699 rows * 3 columns = 2097 parameters, under the 2100 ceiling.
    assert_eq!(batch.plan::<SqlServer>(&options), SyncStrategy::FastPath);
    batch.add(reading(699, 0));
    assert_eq!(batch.plan::<SqlServer>(&options), SyncStrategy::Staging { indexed: true });
    assert_eq!(batch.plan::<Postgres>(&options), SyncStrategy::FastPath);

    batch.update(reading(1, 0));
    assert_eq!(batch.plan::<Postgres>(&options), SyncStrategy::Staging { indexed: true });
}

#[test]
fn staging_index_threshold() {
    let options = SyncOptions::default();
    let mut batch = BulkBatch::new();
    batch.remove(order(1, ""));
    for id in 2..=499 {
        batch.update(order(id, ""));
    }
    assert_eq!(batch.len(), 499);
    assert_eq!(batch.plan::<SqlServer>(&options), SyncStrategy::Staging { indexed: false });
    batch.add(order(500, ""));
    assert_eq!(batch.plan::<SqlServer>(&options), SyncStrategy::Staging { indexed: true });
    assert_eq!(
        batch.plan::<SqlServer>(&options.with_index_threshold(1000)),
        SyncStrategy::Staging { indexed: false }
    );
}

#[tokio::test]
async fn indexed_staging_creates_the_key_index_first() {
    let mut conn = orders_sql_server();
    let mut batch = BulkBatch::new();
    batch.add(order(1, "a")).add(order(2, "b")).remove(order(3, ""));
    let options = SyncOptions::default().with_index_threshold(3);
    let counts = batch.apply::<SqlServer>(&mut conn, &options).await.unwrap();
    assert_eq!(counts.inserted, 2);
    assert_eq!(counts.deleted, 0);
    assert!(conn.statements()[2].starts_with("CREATE CLUSTERED INDEX [IX_Orders_bulk]"));
}

#[tokio::test]
async fn fast_path_inserts_in_one_statement() {
    let mut conn = orders_sql_server();
    let mut batch = BulkBatch::new();
    batch.add(order(1, "a")).add(order(2, "b"));
    let counts = batch.apply::<SqlServer>(&mut conn, &SyncOptions::default()).await.unwrap();
    assert_eq!(counts.inserted, 2);
    assert_eq!(conn.statements().len(), 1);
    assert!(conn.statements()[0].starts_with(order_sql_server::INSERT_BATCH));
    assert!(conn.statements()[0].ends_with("(@p7, @p8, @p9, @p10, @p11, @p12)"));
    assert!(conn.staging_tables().is_empty());
    assert_eq!(conn.table().rows().len(), 2);
}

#[tokio::test]
async fn empty_batch_touches_nothing() {
    let mut conn = orders_sql_server();
    let batch: BulkBatch<Order> = BulkBatch::new();
    let counts = batch.apply::<SqlServer>(&mut conn, &SyncOptions::default()).await.unwrap();
    assert_eq!(counts, SyncCounts::default());
    assert!(conn.statements().is_empty());
}

#[tokio::test]
async fn sync_requires_an_open_transaction() {
    let mut conn = orders_sql_server().autocommit();
    let batch: BulkBatch<Order> = BulkBatch::new();
    let err = batch
        .apply::<SqlServer>(&mut conn, &SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransactionRequired { .. }));
    assert!(conn.statements().is_empty());
}

#[tokio::test]
async fn sync_against_the_wrong_dialect_fails_before_io() {
    let mut conn = orders_postgres();
    let err = mixed_batch()
        .apply::<SqlServer>(&mut conn, &SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DialectMismatch { .. }));
    assert!(conn.statements().is_empty());
}

#[tokio::test]
async fn cancellation_stops_at_the_next_checkpoint() {
    let token = CancellationToken::new();
    let mut conn = orders_sql_server().cancel_after(1, token.clone());
    let options = SyncOptions::default().with_cancellation(token);
    let err = mixed_batch().apply::<SqlServer>(&mut conn, &options).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(conn.statements().len(), 1);
    assert_eq!(conn.loaded_rows(), 0);
}

#[tokio::test]
async fn failures_propagate_unchanged() {
    let mut conn = orders_sql_server().fail_on("SELECT @inserted");
    <Order as Entity<SqlServer>>::insert_many(&seed(), &mut conn).await.unwrap();
    let err = mixed_batch()
        .apply::<SqlServer>(&mut conn, &SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Driver(_)));
    assert_eq!(conn.table().rows().len(), 10);
}

#[tokio::test]
async fn statement_timeout_is_enforced() {
    let mut conn = orders_sql_server().with_delay(Duration::from_millis(200));
    let mut batch = BulkBatch::new();
    batch.add(order(1, "slow"));
    let options = SyncOptions::default().with_timeout(Duration::from_millis(10));
    let err = batch.apply::<SqlServer>(&mut conn, &options).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(limit) if limit == Duration::from_millis(10)));
}

#[test]
fn generated_sql_constants() {
    assert_eq!(order_sql_server::TABLE, "[sales].[Orders]");
    assert_eq!(order_sql_server::INSERT_WIDTH, 6);
    assert!(order_sql_server::CREATE.contains("[CustomerName] NVARCHAR(120) NOT NULL"));
    assert!(order_sql_server::CREATE.contains("[total] DECIMAL(18,2) NOT NULL"));
    assert!(order_sql_server::CREATE.contains("[PlacedAt] DATETIME2 DEFAULT SYSUTCDATETIME() NOT NULL"));
    assert!(order_sql_server::SELECT.contains("[PlacedAt] AS [placed_at]"));
    assert!(order_sql_server::UPSERT.is_some_and(|s| s.starts_with("MERGE INTO [sales].[Orders]")));
    assert_eq!(order_sql_server::STAGING.table, "[#Orders_bulk]");

    assert!(order_postgres::CREATE.contains("\"customer_name\" VARCHAR(120) NOT NULL"));
    assert!(order_postgres::CREATE.contains("\"note\" TEXT NULL"));
    assert!(order_postgres::UPSERT.is_some_and(|s| s.contains("ON CONFLICT (\"id\")")));

    assert_eq!(reading_sql_server::TABLE, "[dbo].[SensorReadings]");
    assert_eq!(reading_postgres::TABLE, "\"public\".\"sensor_readings\"");
    assert!(reading_sql_server::DELETE_BATCH.is_none());
    assert!(reading_sql_server::FIND.is_some_and(|s| s.ends_with("WHERE [sensor] = @sensor AND [taken_at] = @taken_at")));

    assert_eq!(customer_sql_server::Params::EMAIL.size, Some(bulkgen::ColumnSize::Len(320)));
    assert!(customer_sql_server::CREATE.contains("[email] VARCHAR(320) NULL"));
}

#[test]
fn result_rows_decode_enums() {
    let columns: std::sync::Arc<[String]> =
        vec!["status".to_owned(), "orders".to_owned(), "total".to_owned()].into();
    let row = Row::new(
        columns.clone(),
        vec![Value::I16(2), Value::I64(3), Value::Decimal(Decimal::new(4500, 2))],
    );
    let total = StatusTotal::from_row(&row).unwrap();
    assert_eq!(
        total,
        StatusTotal {
            status: OrderStatus::Shipped,
            orders: 3,
            total: Decimal::new(4500, 2),
        }
    );

    let bad = Row::new(columns, vec![Value::I16(9), Value::I64(0), Value::Decimal(Decimal::ZERO)]);
    match StatusTotal::from_row(&bad) {
        Err(Error::Decode { column, message }) => {
            assert_eq!(column, "status");
            assert!(message.contains("OrderStatus"));
        }
        other => panic!("expected a decode error, got {:?}", other),
    }
}

#[tokio::test]
async fn customer_lookup_by_uuid_key() {
    let id = Uuid::from_u128(0x42);
    let mut conn = MockConnection::new(
        Dialect::SqlServer,
        MockTable::new("[dbo].[Customers]", &["id", "name", "email", "active"], &["id"]).with_rows(vec![
            vec![
                Value::Uuid(Uuid::from_u128(1)),
                Value::Text("other".into()),
                Value::Null,
                Value::Bool(false),
            ],
            vec![
                Value::Uuid(id),
                Value::Text("Ada".into()),
                Value::Text("ada@example.com".into()),
                Value::Bool(true),
            ],
        ]),
    );
    let found = <Customer as Entity<SqlServer>>::find(&mut conn, vec![customer_sql_server::Params::id(id)])
        .await
        .unwrap();
    assert_eq!(
        found,
        Some(Customer {
            id,
            name: "Ada".to_owned(),
            email: Some("ada@example.com".to_owned()),
            active: true,
        })
    );
}
