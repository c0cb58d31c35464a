use std::time::Duration;

use crate::bulk::SyncCounts;

#[cfg(feature = "metrics")]
pub(crate) fn record_statement_metrics(operation: &str, table: &str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let labels = [
        ("operation", operation.to_string()),
        ("table", table.to_string()),
    ];
    metrics::histogram!("bulkgen.query.duration_ms", &labels).record(elapsed_ms);
    metrics::counter!("bulkgen.query.count", &labels).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_statement_metrics(_operation: &str, _table: &str, _elapsed: Duration) {}

#[cfg(feature = "metrics")]
pub(crate) fn record_sync_metrics(table: &str, strategy: &str, counts: SyncCounts) {
    for (kind, rows) in [
        ("insert", counts.inserted),
        ("update", counts.updated),
        ("delete", counts.deleted),
    ] {
        let labels = [
            ("table", table.to_string()),
            ("strategy", strategy.to_string()),
            ("kind", kind.to_string()),
        ];
        metrics::counter!("bulkgen.sync.rows", &labels).increment(rows);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_sync_metrics(_table: &str, _strategy: &str, _counts: SyncCounts) {}
