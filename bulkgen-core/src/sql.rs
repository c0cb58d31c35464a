//! SQL text for one table in one dialect.
//!
//! Everything here is a pure function of a [`TableModel`]. The generator calls
//! it at build time and embeds the strings as constants; the runtime only uses
//! [`batch_values`] to extend the batch templates.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::dialect::{Dialect, OP_COLUMN, UpsertStrategy};
use crate::types::{ColumnSize, DbType, TypeFamily};

/// Resolved shape of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnModel {
    /// Rust field the column maps to.
    pub property: String,
    /// Column name, also used as the parameter name.
    pub column: String,
    pub db_type: DbType,
    pub size: Option<ColumnSize>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub nullable: bool,
    /// Raw SQL default expression.
    pub default_sql: Option<String>,
}

impl ColumnModel {
    pub fn new(property: impl Into<String>, db_type: DbType) -> Self {
        let property = property.into();
        Self {
            column: property.clone(),
            property,
            db_type,
            size: None,
            precision: None,
            scale: None,
            nullable: false,
            default_sql: None,
        }
    }

    /// Literal column type, e.g. `NVARCHAR(100)`.
    pub fn type_sql(&self) -> String {
        self.db_type.render(self.size, self.precision, self.scale)
    }

    /// Name the column is bound under in single-row statements.
    pub fn param_name(&self) -> String {
        param_name(&self.column)
    }
}

/// A table as the SQL builder sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableModel {
    pub dialect: Dialect,
    pub schema: String,
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnModel>,
    /// Key property names, in key order.
    pub keys: Vec<String>,
    /// Store-assigned property names.
    pub identity: Vec<String>,
}

/// Every statement generated for a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSql {
    pub table: String,
    pub create: String,
    pub insert: String,
    pub insert_batch: String,
    /// Parameters per row of the batch insert.
    pub insert_width: usize,
    pub update: Option<String>,
    pub delete: Option<String>,
    pub delete_batch: Option<String>,
    pub upsert: Option<String>,
    pub truncate: String,
    pub select: String,
    pub find: Option<String>,
    pub staging: Option<StagingScript>,
}

/// Staging table DDL and the two apply-script variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingScript {
    /// Quoted staging table name.
    pub table: String,
    pub create: String,
    /// Staging column names in load order, ending with the op column.
    pub columns: Vec<String>,
    pub index: String,
    pub apply: String,
    pub apply_indexed: String,
}

/// Parameter name derived from a column name: anything but ASCII
/// alphanumerics and `_` becomes `_`.
pub fn param_name(column: &str) -> String {
    column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

impl TableModel {
    pub fn qualified_name(&self) -> String {
        self.dialect.qualified(&self.schema, &self.name)
    }

    pub fn is_key(&self, property: &str) -> bool {
        self.keys.iter().any(|k| k == property)
    }

    pub fn is_identity(&self, property: &str) -> bool {
        self.identity.iter().any(|k| k == property)
    }

    pub fn column(&self, property: &str) -> Option<&ColumnModel> {
        self.columns.iter().find(|c| c.property == property)
    }

    /// Columns written by INSERT: every non-identity column.
    pub fn insert_columns(&self) -> Vec<&ColumnModel> {
        self.columns
            .iter()
            .filter(|c| !self.is_identity(&c.property))
            .collect()
    }

    /// Columns written by UPDATE: neither key nor identity.
    pub fn update_columns(&self) -> Vec<&ColumnModel> {
        self.columns
            .iter()
            .filter(|c| !self.is_key(&c.property) && !self.is_identity(&c.property))
            .collect()
    }

    /// Key columns, in key order.
    pub fn key_columns(&self) -> Vec<&ColumnModel> {
        self.keys.iter().filter_map(|k| self.column(k)).collect()
    }

    /// Keys an upsert can match on.
    pub fn upsert_keys(&self) -> Vec<&ColumnModel> {
        self.key_columns()
            .into_iter()
            .filter(|c| !self.is_identity(&c.property))
            .collect()
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn column_list(&self, columns: &[&ColumnModel], alias: Option<&str>) -> String {
        columns
            .iter()
            .map(|c| match alias {
                Some(a) => format!("{}.{}", a, self.q(&c.column)),
                None => self.q(&c.column),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn key_match(&self, left: &str, right: &str, keys: &[&ColumnModel]) -> String {
        keys.iter()
            .map(|c| {
                let col = self.q(&c.column);
                format!("{}.{} = {}.{}", left, col, right, col)
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// `WHERE` over all keys; placeholders numbered from `start`.
    fn key_where(&self, start: usize) -> String {
        self.key_columns()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{} = {}",
                    self.q(&c.column),
                    self.dialect.named_placeholder(&c.param_name(), start + i)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn implicit_default(&self, column: &ColumnModel) -> Option<String> {
        let implicit = column.property.eq_ignore_ascii_case("id")
            && column.db_type.family() == TypeFamily::Uuid
            && self.is_key(&column.property)
            && !self.is_identity(&column.property);
        implicit.then(|| self.dialect.spec().uuid_default.to_owned())
    }

    pub fn create_sql(&self) -> String {
        let spec = self.dialect.spec();
        let mut clauses: Vec<String> = Vec::with_capacity(self.columns.len() + 1);
        for column in &self.columns {
            let mut def = format!("{} {}", self.q(&column.column), column.type_sql());
            if self.is_identity(&column.property) {
                def.push(' ');
                def.push_str(spec.identity_clause);
            }
            if let Some(default) = column
                .default_sql
                .clone()
                .or_else(|| self.implicit_default(column))
            {
                let _ = write!(def, " DEFAULT {}", default);
            }
            def.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
            clauses.push(def);
        }
        let keys = self.key_columns();
        if !keys.is_empty() {
            clauses.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.q(&format!("PK_{}", self.name)),
                self.column_list(&keys, None)
            ));
        }
        format!("CREATE TABLE {} ({})", self.qualified_name(), clauses.join(", "))
    }

    pub fn insert_sql(&self) -> String {
        let columns = self.insert_columns();
        let values = columns
            .iter()
            .enumerate()
            .map(|(i, c)| self.dialect.named_placeholder(&c.param_name(), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified_name(),
            self.column_list(&columns, None),
            values
        )
    }

    /// Fixed prefix of the multi-row INSERT; callers append [`batch_values`].
    pub fn insert_batch_prefix(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ",
            self.qualified_name(),
            self.column_list(&self.insert_columns(), None)
        )
    }

    /// `None` when there is no key or nothing to set.
    pub fn update_sql(&self) -> Option<String> {
        let columns = self.update_columns();
        if columns.is_empty() || self.keys.is_empty() {
            return None;
        }
        let set = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{} = {}",
                    self.q(&c.column),
                    self.dialect.named_placeholder(&c.param_name(), i + 1)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "UPDATE {} SET {} WHERE {}",
            self.qualified_name(),
            set,
            self.key_where(columns.len() + 1)
        ))
    }

    pub fn delete_sql(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        Some(format!(
            "DELETE FROM {} WHERE {}",
            self.qualified_name(),
            self.key_where(1)
        ))
    }

    /// Prefix of the delete-by-id-list statement; only for single-key tables.
    /// Callers append a placeholder group from [`batch_values`].
    pub fn delete_batch_prefix(&self) -> Option<String> {
        match self.key_columns().as_slice() {
            [key] => Some(format!(
                "DELETE FROM {} WHERE {} IN ",
                self.qualified_name(),
                self.q(&key.column)
            )),
            _ => None,
        }
    }

    /// `None` when no non-identity key exists to match on.
    pub fn upsert_sql(&self) -> Option<String> {
        let keys = self.upsert_keys();
        if keys.is_empty() {
            return None;
        }
        let columns = self.insert_columns();
        let updates = self.update_columns();
        Some(match self.dialect.upsert_strategy() {
            UpsertStrategy::Merge => {
                let values = columns
                    .iter()
                    .map(|c| self.dialect.named_placeholder(&c.param_name(), 0))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!(
                    "MERGE INTO {} WITH (HOLDLOCK) AS target USING (VALUES ({})) AS source ({}) ON {}",
                    self.qualified_name(),
                    values,
                    self.column_list(&columns, None),
                    self.key_match("target", "source", &keys)
                );
                if !updates.is_empty() {
                    let set = updates
                        .iter()
                        .map(|c| {
                            let col = self.q(&c.column);
                            format!("target.{} = source.{}", col, col)
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = write!(sql, " WHEN MATCHED THEN UPDATE SET {}", set);
                }
                let _ = write!(
                    sql,
                    " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
                    self.column_list(&columns, None),
                    self.column_list(&columns, Some("source"))
                );
                sql
            }
            UpsertStrategy::OnConflict => {
                let action = if updates.is_empty() {
                    "DO NOTHING".to_owned()
                } else {
                    let set = updates
                        .iter()
                        .map(|c| {
                            let col = self.q(&c.column);
                            format!("{} = EXCLUDED.{}", col, col)
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("DO UPDATE SET {}", set)
                };
                format!(
                    "{} ON CONFLICT ({}) {}",
                    self.insert_sql(),
                    self.column_list(&keys, None),
                    action
                )
            }
        })
    }

    pub fn truncate_sql(&self) -> String {
        format!("TRUNCATE TABLE {}", self.qualified_name())
    }

    /// Renamed columns are aliased back to their property so rows decode by
    /// property name in every dialect.
    pub fn select_sql(&self) -> String {
        let list = self
            .columns
            .iter()
            .map(|c| {
                if c.column.eq_ignore_ascii_case(&c.property) {
                    self.q(&c.column)
                } else {
                    format!("{} AS {}", self.q(&c.column), self.q(&c.property))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {} FROM {}", list, self.qualified_name())
    }

    pub fn select_by_key_sql(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        Some(format!("{} WHERE {}", self.select_sql(), self.key_where(1)))
    }

    /// Staging DDL and apply scripts; `None` for keyless tables.
    pub fn staging(&self) -> Option<StagingScript> {
        let keys = self.key_columns();
        if keys.is_empty() {
            return None;
        }
        let spec = self.dialect.spec();
        let table = self.dialect.staging_table(&self.name);

        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {} NULL", self.q(&c.column), c.type_sql()))
            .collect();
        defs.push(format!("{} {} NOT NULL", self.q(OP_COLUMN), spec.op_column_type));
        let create = match self.dialect {
            Dialect::SqlServer => format!("CREATE TABLE {} ({})", table, defs.join(", ")),
            Dialect::Postgres => format!("CREATE TEMP TABLE {} ({})", table, defs.join(", ")),
        };

        let mut columns: Vec<String> = self.columns.iter().map(|c| c.column.clone()).collect();
        columns.push(OP_COLUMN.to_owned());

        let key_list = self.column_list(&keys, None);
        let index = match self.dialect {
            Dialect::SqlServer => format!(
                "CREATE CLUSTERED INDEX {} ON {} ({})",
                self.q(&format!("IX_{}_bulk", self.name)),
                table,
                key_list
            ),
            Dialect::Postgres => format!(
                "CREATE INDEX ON {} ({});\nANALYZE {}",
                table, key_list, table
            ),
        };
        let apply = match self.dialect {
            Dialect::SqlServer => self.sql_server_apply(&table, &keys),
            Dialect::Postgres => self.postgres_apply(&table, &keys),
        };
        let apply_indexed = format!("{};\n{}", index, apply);
        Some(StagingScript {
            table,
            create,
            columns,
            index,
            apply,
            apply_indexed,
        })
    }

    fn op_filter(&self, tag: u8) -> String {
        format!("s.{} = {}", self.q(OP_COLUMN), tag)
    }

    fn sql_server_apply(&self, staging: &str, keys: &[&ColumnModel]) -> String {
        let target = self.qualified_name();
        let inserts = self.insert_columns();
        let updates = self.update_columns();
        let on = self.key_match("t", "s", keys);
        let mut sql = String::with_capacity(512);
        sql.push_str("SET NOCOUNT ON;\n");
        sql.push_str("DECLARE @inserted BIGINT = 0, @updated BIGINT = 0, @deleted BIGINT = 0;\n");
        let _ = writeln!(
            sql,
            "INSERT INTO {} ({}) SELECT {} FROM {} AS s WHERE {};",
            target,
            self.column_list(&inserts, None),
            self.column_list(&inserts, Some("s")),
            staging,
            self.op_filter(1)
        );
        sql.push_str("SET @inserted = @@ROWCOUNT;\n");
        if !updates.is_empty() {
            let set = updates
                .iter()
                .map(|c| {
                    let col = self.q(&c.column);
                    format!("t.{} = s.{}", col, col)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                sql,
                "UPDATE t SET {} FROM {} AS t INNER JOIN {} AS s ON {} WHERE {};",
                set,
                target,
                staging,
                on,
                self.op_filter(2)
            );
            sql.push_str("SET @updated = @@ROWCOUNT;\n");
        }
        let _ = writeln!(
            sql,
            "DELETE t FROM {} AS t INNER JOIN {} AS s ON {} WHERE {};",
            target,
            staging,
            on,
            self.op_filter(3)
        );
        sql.push_str("SET @deleted = @@ROWCOUNT;\n");
        let _ = writeln!(sql, "DROP TABLE {};", staging);
        sql.push_str("SELECT @inserted AS [inserted], @updated AS [updated], @deleted AS [deleted];");
        sql
    }

    fn postgres_apply(&self, staging: &str, keys: &[&ColumnModel]) -> String {
        let target = self.qualified_name();
        let inserts = self.insert_columns();
        let updates = self.update_columns();
        let on = self.key_match("t", "s", keys);
        let mut ctes = vec![format!(
            "ins AS (INSERT INTO {} ({}) SELECT {} FROM {} AS s WHERE {} RETURNING 1)",
            target,
            self.column_list(&inserts, None),
            self.column_list(&inserts, Some("s")),
            staging,
            self.op_filter(1)
        )];
        let updated = if updates.is_empty() {
            "0"
        } else {
            let set = updates
                .iter()
                .map(|c| {
                    let col = self.q(&c.column);
                    format!("{} = s.{}", col, col)
                })
                .collect::<Vec<_>>()
                .join(", ");
            ctes.push(format!(
                "upd AS (UPDATE {} AS t SET {} FROM {} AS s WHERE {} AND {} RETURNING 1)",
                target,
                set,
                staging,
                on,
                self.op_filter(2)
            ));
            "(SELECT COUNT(*) FROM upd)"
        };
        ctes.push(format!(
            "del AS (DELETE FROM {} AS t USING {} AS s WHERE {} AND {} RETURNING 1)",
            target,
            staging,
            on,
            self.op_filter(3)
        ));
        format!(
            "WITH {}\nSELECT (SELECT COUNT(*) FROM ins) AS \"inserted\", {}::BIGINT AS \"updated\", (SELECT COUNT(*) FROM del) AS \"deleted\";\nDROP TABLE {}",
            ctes.join(",\n"),
            updated,
            staging
        )
    }

    /// Builds every statement for this table.
    pub fn statements(&self) -> TableSql {
        let delete_batch = self.delete_batch_prefix();
        TableSql {
            table: self.qualified_name(),
            create: self.create_sql(),
            insert: self.insert_sql(),
            insert_batch: self.insert_batch_prefix(),
            insert_width: self.insert_columns().len(),
            update: self.update_sql(),
            delete: self.delete_sql(),
            delete_batch,
            upsert: self.upsert_sql(),
            truncate: self.truncate_sql(),
            select: self.select_sql(),
            find: self.select_by_key_sql(),
            staging: self.staging(),
        }
    }
}

type BatchKey = (Dialect, usize, usize, usize);

/// Distinct batch shapes kept before the cache stops growing.
const BATCH_CACHE_CAPACITY: usize = 256;

static BATCH_CACHE: OnceLock<Mutex<BatchCache>> = OnceLock::new();

/// Placeholder groups keyed by shape, bounded to `capacity` entries. Shapes
/// seen after it fills are built on every call.
#[derive(Debug)]
struct BatchCache {
    entries: HashMap<BatchKey, Arc<str>>,
    capacity: usize,
}

impl BatchCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    fn get_or_build(&mut self, key: BatchKey) -> Arc<str> {
        if let Some(value) = self.entries.get(&key) {
            return value.clone();
        }
        let (dialect, rows, width, start) = key;
        let value: Arc<str> = Arc::from(build_values(dialect, rows, width, start));
        if self.entries.len() < self.capacity {
            self.entries.insert(key, value.clone());
        }
        value
    }
}

fn build_values(dialect: Dialect, rows: usize, width: usize, start: usize) -> String {
    let mut out = String::with_capacity(rows * width * 6);
    let mut n = start;
    for row in 0..rows {
        if row > 0 {
            out.push_str(", ");
        }
        out.push('(');
        for col in 0..width {
            if col > 0 {
                out.push_str(", ");
            }
            out.push_str(&dialect.placeholder(n));
            n += 1;
        }
        out.push(')');
    }
    out
}

/// `rows` parenthesized groups of `width` positional placeholders, numbered
/// from `start`: `(@p1, @p2), (@p3, @p4)`.
///
/// Results are cached per `(dialect, rows, width, start)` up to a fixed
/// number of shapes.
pub fn batch_values(dialect: Dialect, rows: usize, width: usize, start: usize) -> Arc<str> {
    let cache = BATCH_CACHE.get_or_init(|| Mutex::new(BatchCache::new(BATCH_CACHE_CAPACITY)));
    let mut guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
    guard.get_or_build((dialect, rows, width, start))
}
