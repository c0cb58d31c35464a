//! Staging-table bulk synchronization.
//!
//! A [`BulkBatch`] collects insert/update/delete intents for one model and
//! applies them against the model's table inside a caller-owned transaction.
//! Insert-only batches small enough for one statement take the fast path;
//! everything else is loaded into a staging table and applied by a single
//! script that reports the three affected-row counts.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::connection::{BulkLoad, Command, Connection, ensure_dialect};
use crate::dialect::DialectMarker;
use crate::entity::{BulkEntity, execute_statement, fetch_statement, load_rows};
use crate::error::{Error, Result};
use crate::metrics::record_sync_metrics;
use crate::sql::batch_values;
use crate::value::Value;

/// Environment variable overriding [`SyncOptions::index_threshold`].
pub const INDEX_THRESHOLD_ENV: &str = "BULKGEN_INDEX_THRESHOLD";
/// Environment variable setting [`SyncOptions::timeout`] in seconds.
pub const TIMEOUT_ENV: &str = "BULKGEN_TIMEOUT_SECS";

/// Operation tag; the discriminant is the value stored in the staging table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationKind {
    Insert = 1,
    Update = 2,
    Delete = 3,
}

impl OperationKind {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// One tagged item of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation<M> {
    pub kind: OperationKind,
    pub item: M,
}

/// Affected-row counts reported by a synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl SyncCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

/// How a batch is going to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Nothing to do.
    Empty,
    /// One multi-row INSERT.
    FastPath,
    /// Staging table, bulk load, apply script.
    Staging { indexed: bool },
}

impl SyncStrategy {
    fn label(self) -> &'static str {
        match self {
            SyncStrategy::Empty => "empty",
            SyncStrategy::FastPath => "fast_path",
            SyncStrategy::Staging { indexed: false } => "staging",
            SyncStrategy::Staging { indexed: true } => "staging_indexed",
        }
    }
}

/// Tuning knobs for [`BulkBatch::apply`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Batches with at least this many rows index the staging table.
    pub index_threshold: usize,
    /// Per-statement timeout.
    pub timeout: Option<Duration>,
    /// Overrides the dialect's parameter ceiling for the fast-path decision.
    pub parameter_limit: Option<usize>,
    /// Checked before every statement.
    pub cancel: CancellationToken,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            index_threshold: 500,
            timeout: None,
            parameter_limit: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl SyncOptions {
    /// Defaults overridden by `BULKGEN_INDEX_THRESHOLD` and `BULKGEN_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(raw) = lookup(INDEX_THRESHOLD_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(value) => options.index_threshold = value,
                Err(err) => tracing::warn!(var = INDEX_THRESHOLD_ENV, value = %raw, error = %err, "ignoring invalid value"),
            }
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(0) => options.timeout = None,
                Ok(secs) => options.timeout = Some(Duration::from_secs(secs)),
                Err(err) => tracing::warn!(var = TIMEOUT_ENV, value = %raw, error = %err, "ignoring invalid value"),
            }
        }
        options
    }

    pub fn with_index_threshold(mut self, threshold: usize) -> Self {
        self.index_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_parameter_limit(mut self, limit: usize) -> Self {
        self.parameter_limit = Some(limit);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Ordered, reusable batch of bulk operations for one model type.
///
/// Not meant for concurrent mutation; `apply` borrows the batch immutably so
/// it can be cleared and refilled afterwards without reallocating.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkBatch<M> {
    operations: Vec<BulkOperation<M>>,
}

impl<M> Default for BulkBatch<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> BulkBatch<M> {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            operations: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, item: M) -> &mut Self {
        self.push(OperationKind::Insert, item)
    }

    pub fn update(&mut self, item: M) -> &mut Self {
        self.push(OperationKind::Update, item)
    }

    pub fn remove(&mut self, item: M) -> &mut Self {
        self.push(OperationKind::Delete, item)
    }

    pub fn push(&mut self, kind: OperationKind, item: M) -> &mut Self {
        self.operations.push(BulkOperation { kind, item });
        self
    }

    /// Empties the batch, keeping its allocation.
    pub fn clear(&mut self) {
        self.operations.clear();
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BulkOperation<M>> {
        self.operations.iter()
    }

    pub fn is_insert_only(&self) -> bool {
        self.operations
            .iter()
            .all(|op| op.kind == OperationKind::Insert)
    }

    /// Picks the strategy `apply` would use for dialect `D`.
    pub fn plan<D>(&self, options: &SyncOptions) -> SyncStrategy
    where
        D: DialectMarker,
        M: BulkEntity<D>,
    {
        if self.is_empty() {
            return SyncStrategy::Empty;
        }
        let limit = options
            .parameter_limit
            .unwrap_or_else(|| D::DIALECT.parameter_limit());
        let width = M::sql().insert_width;
        let under_values_cap = D::DIALECT
            .spec()
            .max_values_rows
            .is_none_or(|max| self.len() <= max);
        if self.is_insert_only() && self.len().saturating_mul(width) < limit && under_values_cap {
            return SyncStrategy::FastPath;
        }
        SyncStrategy::Staging {
            indexed: self.len() >= options.index_threshold,
        }
    }

    /// Applies the batch inside the transaction `conn` is running.
    ///
    /// Failures propagate unchanged; the caller's transaction is the unit of
    /// rollback.
    #[tracing::instrument(skip(self, conn, options), fields(table = M::sql().table, rows = self.len()))]
    pub async fn apply<D>(&self, conn: &mut dyn Connection, options: &SyncOptions) -> Result<SyncCounts>
    where
        D: DialectMarker,
        M: BulkEntity<D>,
    {
        if !conn.in_transaction() {
            return Err(Error::TransactionRequired { operation: "bulk sync" });
        }
        ensure_dialect(conn, D::DIALECT)?;

        let strategy = self.plan::<D>(options);
        let start = Instant::now();
        let counts = match strategy {
            SyncStrategy::Empty => return Ok(SyncCounts::default()),
            SyncStrategy::FastPath => self.apply_fast_path::<D>(conn, options).await?,
            SyncStrategy::Staging { indexed } => self.apply_staged::<D>(conn, options, indexed).await?,
        };

        tracing::info!(
            strategy = strategy.label(),
            inserted = counts.inserted,
            updated = counts.updated,
            deleted = counts.deleted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "bulk sync applied"
        );
        record_sync_metrics(M::sql().table, strategy.label(), counts);
        Ok(counts)
    }

    async fn apply_fast_path<D>(&self, conn: &mut dyn Connection, options: &SyncOptions) -> Result<SyncCounts>
    where
        D: DialectMarker,
        M: BulkEntity<D>,
    {
        let sql = M::sql();
        let dialect = D::DIALECT;
        let mut params = Vec::with_capacity(self.len() * sql.insert_width);
        for op in &self.operations {
            for param in op.item.insert_params() {
                let n = params.len() + 1;
                params.push(param.renamed(dialect.positional_name(n)));
            }
        }
        let values = batch_values(dialect, self.len(), sql.insert_width, 1);
        let command = Command::new(format!("{}{}", sql.insert_batch, values))
            .with_params(params)
            .with_timeout(options.timeout);

        options.checkpoint()?;
        let inserted = execute_statement(conn, dialect, "sync_insert", sql.table, command).await?;
        Ok(SyncCounts {
            inserted,
            ..SyncCounts::default()
        })
    }

    async fn apply_staged<D>(
        &self,
        conn: &mut dyn Connection,
        options: &SyncOptions,
        indexed: bool,
    ) -> Result<SyncCounts>
    where
        D: DialectMarker,
        M: BulkEntity<D>,
    {
        let table = M::sql().table;
        let staging = M::staging();
        let dialect = D::DIALECT;

        let rows: Vec<Vec<Value>> = self
            .operations
            .iter()
            .map(|op| {
                let mut row = op.item.staging_row();
                row.push(Value::I16(op.kind.tag().into()));
                row
            })
            .collect();

        options.checkpoint()?;
        let create = Command::new(staging.create).with_timeout(options.timeout);
        execute_statement(conn, dialect, "staging_create", table, create).await?;

        options.checkpoint()?;
        load_rows(
            conn,
            table,
            BulkLoad {
                table: staging.table,
                columns: staging.columns,
                rows: &rows,
                timeout: options.timeout,
            },
        )
        .await?;

        options.checkpoint()?;
        let script = if indexed {
            staging.apply_indexed
        } else {
            staging.apply
        };
        let apply = Command::new(script).with_timeout(options.timeout);
        let result = fetch_statement(conn, dialect, "staging_apply", table, apply).await?;
        let row = result.last().ok_or(Error::MissingCounts)?;
        Ok(SyncCounts {
            inserted: row.get("inserted")?,
            updated: row.get("updated")?,
            deleted: row.get("deleted")?,
        })
    }
}

impl<'a, M> IntoIterator for &'a BulkBatch<M> {
    type Item = &'a BulkOperation<M>;
    type IntoIter = std::slice::Iter<'a, BulkOperation<M>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<M> Extend<BulkOperation<M>> for BulkBatch<M> {
    fn extend<I: IntoIterator<Item = BulkOperation<M>>>(&mut self, iter: I) {
        self.operations.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_tags() {
        assert_eq!(OperationKind::Insert.tag(), 1);
        assert_eq!(OperationKind::Update.tag(), 2);
        assert_eq!(OperationKind::Delete.tag(), 3);
    }

    #[test]
    fn batch_is_reusable() {
        let mut batch = BulkBatch::with_capacity(4);
        batch.add(1).update(2).remove(3);
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_insert_only());
        let kinds: Vec<_> = batch.iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![OperationKind::Insert, OperationKind::Update, OperationKind::Delete]
        );
        batch.clear();
        assert!(batch.is_empty());
        batch.add(4);
        assert!(batch.is_insert_only());
    }

    #[test]
    fn options_from_lookup() {
        let options = SyncOptions::from_lookup(|key| match key {
            INDEX_THRESHOLD_ENV => Some("250".into()),
            TIMEOUT_ENV => Some("30".into()),
            _ => None,
        });
        assert_eq!(options.index_threshold, 250);
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));

        let options = SyncOptions::from_lookup(|key| match key {
            INDEX_THRESHOLD_ENV => Some("lots".into()),
            _ => None,
        });
        assert_eq!(options.index_threshold, 500);
        assert_eq!(options.timeout, None);
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let token = CancellationToken::new();
        let options = SyncOptions::default().with_cancellation(token.clone());
        assert!(options.checkpoint().is_ok());
        token.cancel();
        assert!(matches!(options.checkpoint(), Err(Error::Cancelled)));
    }
}
