use bulkgen_core::sql::{ColumnModel, TableModel};
use bulkgen_core::{DbType, Dialect, SqlServerType, rows_per_statement};
use proptest::prelude::*;
use proptest::strategy::ValueTree;
use proptest::test_runner::{Config, TestRunner};

fn identifier_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_\\]\\[\"\\s]{1,32}".prop_map(|s| s)
}

fn unquote(dialect: Dialect, quoted: &str) -> String {
    let close = match dialect {
        Dialect::SqlServer => "]",
        Dialect::Postgres => "\"",
    };
    let inner = &quoted[1..quoted.len() - 1];
    inner.replace(&format!("{}{}", close, close), close)
}

#[test]
fn quoting_round_trips_hostile_identifiers() {
    let mut runner = TestRunner::new(Config {
        cases: 128,
        failure_persistence: None,
        ..Config::default()
    });
    let ident = identifier_strategy();
    for _ in 0..128 {
        let ident = ident.new_tree(&mut runner).unwrap().current();
        for dialect in Dialect::ALL {
            let quoted = dialect.quote(&ident);
            assert_eq!(unquote(dialect, &quoted), ident);
        }
    }
}

#[test]
fn create_quotes_every_column() {
    let mut runner = TestRunner::new(Config {
        cases: 64,
        failure_persistence: None,
        ..Config::default()
    });
    let ident = identifier_strategy();
    for _ in 0..64 {
        let column = ident.new_tree(&mut runner).unwrap().current();
        let mut value = ColumnModel::new("value", DbType::SqlServer(SqlServerType::Int));
        value.column = column.clone();
        let table = TableModel {
            dialect: Dialect::SqlServer,
            schema: "dbo".into(),
            name: "Fuzz".into(),
            columns: vec![ColumnModel::new("id", DbType::SqlServer(SqlServerType::Int)), value],
            keys: vec!["id".into()],
            identity: Vec::new(),
        };
        let sql = table.create_sql();
        assert!(sql.contains(&format!("{} INT NOT NULL", Dialect::SqlServer.quote(&column))));
    }
}

#[test]
fn batches_stay_under_the_parameter_ceiling() {
    let mut runner = TestRunner::new(Config {
        cases: 256,
        failure_persistence: None,
        ..Config::default()
    });
    let limit = 2usize..20_000;
    let width = 1usize..600;
    for _ in 0..256 {
        let limit = limit.new_tree(&mut runner).unwrap().current();
        let width = width.new_tree(&mut runner).unwrap().current();
        let rows = rows_per_statement(limit, width);
        assert!(rows >= 1);
        if width < limit {
            assert!(rows * width < limit, "{} rows of {} for {}", rows, width, limit);
        }
    }
}
