//! In-memory [`Connection`] that understands the statements bulkgen generates.
//!
//! The mock keeps one target table plus any staging tables created against it,
//! records every statement it receives, and can inject failures, delays and
//! cancellations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream};
use tokio_util::sync::CancellationToken;

use crate::connection::{BulkLoad, Command, Connection, with_timeout};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;

/// Target table held by a [`MockConnection`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockTable {
    /// Qualified, quoted name, as generated SQL spells it.
    pub name: String,
    pub columns: Vec<String>,
    pub keys: Vec<String>,
    pub identity: Option<String>,
    rows: Vec<Vec<Value>>,
    next_identity: i64,
}

impl MockTable {
    pub fn new(name: impl Into<String>, columns: &[&str], keys: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            keys: keys.iter().map(|c| c.to_string()).collect(),
            identity: None,
            rows: Vec::new(),
            next_identity: 1,
        }
    }

    /// Marks `column` as store-assigned; inserted rows get increasing ids.
    pub fn with_identity(mut self, column: &str) -> Self {
        self.identity = Some(column.to_owned());
        self
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        if let Some(index) = self.identity.as_deref().and_then(|c| self.index_of(c)) {
            let max = self.rows.iter().filter_map(|r| as_i64(&r[index])).max();
            self.next_identity = max.map_or(1, |m| m + 1);
        }
        self
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    fn key_indexes(&self) -> Vec<usize> {
        self.keys.iter().filter_map(|k| self.index_of(k)).collect()
    }

    /// Builds a full row from named values, assigning identity when absent.
    fn build_row(&mut self, names: &[String], values: &[Value]) -> Vec<Value> {
        let mut row = vec![Value::Null; self.columns.len()];
        for (name, value) in names.iter().zip(values) {
            if let Some(index) = self.index_of(name) {
                row[index] = value.clone();
            }
        }
        if let Some(index) = self.identity.as_deref().and_then(|c| self.index_of(c)) {
            if !names.iter().any(|n| Some(n.as_str()) == self.identity.as_deref()) {
                row[index] = Value::I64(self.next_identity);
                self.next_identity += 1;
            }
        }
        row
    }

    fn matches(&self, row: &[Value], key_names: &[String], key_values: &[Value]) -> bool {
        key_names.iter().zip(key_values).all(|(name, value)| {
            self.index_of(name)
                .is_some_and(|index| same_value(&row[index], value))
        })
    }

    fn update_matching(
        &mut self,
        key_names: &[String],
        key_values: &[Value],
        set_names: &[String],
        set_values: &[Value],
    ) -> u64 {
        let targets: Vec<(usize, Value)> = set_names
            .iter()
            .zip(set_values)
            .filter_map(|(name, value)| self.index_of(name).map(|i| (i, value.clone())))
            .collect();
        let mut updated = 0;
        for row_index in 0..self.rows.len() {
            if self.matches(&self.rows[row_index], key_names, key_values) {
                for (column, value) in &targets {
                    self.rows[row_index][*column] = value.clone();
                }
                updated += 1;
            }
        }
        updated
    }

    fn delete_matching(&mut self, key_names: &[String], key_values: &[Value]) -> u64 {
        let before = self.rows.len();
        let rows = std::mem::take(&mut self.rows);
        self.rows = rows
            .into_iter()
            .filter(|row| !self.matches(row, key_names, key_values))
            .collect();
        (before - self.rows.len()) as u64
    }

    fn upsert(&mut self, names: &[String], values: &[Value]) -> u64 {
        let keys = self.keys.clone();
        let key_values: Vec<Value> = keys
            .iter()
            .map(|k| {
                names
                    .iter()
                    .position(|n| n == k)
                    .map_or(Value::Null, |i| values[i].clone())
            })
            .collect();
        let exists = self.rows.iter().any(|row| self.matches(row, &keys, &key_values));
        if exists {
            let (set_names, set_values): (Vec<String>, Vec<Value>) = names
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .filter(|(n, _)| !keys.contains(n))
                .unzip();
            self.update_matching(&keys, &key_values, &set_names, &set_values)
        } else {
            let row = self.build_row(names, values);
            self.rows.push(row);
            1
        }
    }
}

#[derive(Debug, Default, Clone)]
struct StagingTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// In-memory connection for runtime tests.
#[derive(Debug)]
pub struct MockConnection {
    dialect: Dialect,
    in_transaction: bool,
    table: MockTable,
    created: bool,
    staging: HashMap<String, StagingTable>,
    statements: Vec<String>,
    loaded_rows: usize,
    fail_on: Option<String>,
    delay: Option<Duration>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MockConnection {
    /// A connection inside an open transaction.
    pub fn new(dialect: Dialect, table: MockTable) -> Self {
        Self {
            dialect,
            in_transaction: true,
            table,
            created: false,
            staging: HashMap::new(),
            statements: Vec::new(),
            loaded_rows: 0,
            fail_on: None,
            delay: None,
            cancel_after: None,
        }
    }

    /// Behaves like a connection in autocommit mode.
    pub fn autocommit(mut self) -> Self {
        self.in_transaction = false;
        self
    }

    /// Fails every statement containing `pattern` with a driver error.
    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on = Some(pattern.into());
        self
    }

    /// Delays every `execute` call, so statement timeouts can fire.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancels `token` once `statements` statements or loads have run.
    pub fn cancel_after(mut self, statements: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((statements, token));
        self
    }

    pub fn table(&self) -> &MockTable {
        &self.table
    }

    /// Whether the target table's CREATE statement ran.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Every statement received, in order. Bulk loads appear as `COPY <table>`.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn loaded_rows(&self) -> usize {
        self.loaded_rows
    }

    /// Staging tables still alive.
    pub fn staging_tables(&self) -> Vec<&str> {
        self.staging.keys().map(String::as_str).collect()
    }

    pub fn clear_statements(&mut self) {
        self.statements.clear();
    }

    fn record(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_owned());
        if let Some((after, token)) = &self.cancel_after {
            if self.statements.len() >= *after {
                token.cancel();
            }
        }
        match &self.fail_on {
            Some(pattern) if sql.contains(pattern.as_str()) => Err(Error::driver(
                std::io::Error::other(format!("injected failure on `{}`", pattern)),
            )),
            _ => Ok(()),
        }
    }

    fn idents(&self, segment: &str) -> Vec<String> {
        quoted_idents(self.dialect, segment)
    }

    /// Runs one statement against the in-memory state.
    fn run(&mut self, command: &Command) -> Result<(u64, Option<Row>, Vec<Row>)> {
        self.record(&command.sql)?;
        let sql = command.sql.trim();
        let params: Vec<Value> = command.params.iter().map(|p| p.value.clone()).collect();
        let target = self.table.name.clone();

        if sql.contains(";\n") || sql.starts_with("WITH ") {
            let row = self.run_script(sql)?;
            return Ok((0, row, Vec::new()));
        }
        if let Some(rest) = sql
            .strip_prefix("CREATE TABLE ")
            .or_else(|| sql.strip_prefix("CREATE TEMP TABLE "))
        {
            if rest.starts_with(&format!("{} ", target)) {
                self.created = true;
            } else {
                let name = rest.split(" (").next().unwrap_or_default().to_owned();
                let (defs, _) = split_paren(&rest[name.len()..]);
                let staging = StagingTable {
                    columns: self.idents(defs),
                    rows: Vec::new(),
                };
                self.staging.insert(name, staging);
            }
            return Ok((0, None, Vec::new()));
        }
        if sql == format!("TRUNCATE TABLE {}", target) {
            self.table.rows.clear();
            return Ok((0, None, Vec::new()));
        }
        if let Some(rest) = sql.strip_prefix(&format!("INSERT INTO {} ", target)) {
            let (columns, tail) = split_paren(rest);
            let names = self.idents(columns);
            let width = names.len().max(1);
            if tail.contains(" ON CONFLICT ") {
                return Ok((self.table.upsert(&names, &params), None, Vec::new()));
            }
            let mut inserted = 0;
            for values in params.chunks(width) {
                let row = self.table.build_row(&names, values);
                self.table.rows.push(row);
                inserted += 1;
            }
            return Ok((inserted, None, Vec::new()));
        }
        if sql.starts_with(&format!("MERGE INTO {} ", target)) {
            let source = sql.split(" AS source ").nth(1).unwrap_or_default();
            let names = self.idents(split_paren(source).0);
            return Ok((self.table.upsert(&names, &params), None, Vec::new()));
        }
        if let Some(rest) = sql.strip_prefix(&format!("UPDATE {} SET ", target)) {
            let (set, keys) = rest.split_once(" WHERE ").unwrap_or((rest, ""));
            let set_names = self.idents(set);
            let key_names = self.idents(keys);
            let (set_values, key_values) = params.split_at(set_names.len().min(params.len()));
            let updated = self
                .table
                .update_matching(&key_names, key_values, &set_names, set_values);
            return Ok((updated, None, Vec::new()));
        }
        if let Some(rest) = sql.strip_prefix(&format!("DELETE FROM {} WHERE ", target)) {
            let key_names = self.idents(rest);
            if rest.contains(" IN ") {
                let mut deleted = 0;
                for value in &params {
                    deleted += self.table.delete_matching(&key_names[..1], std::slice::from_ref(value));
                }
                return Ok((deleted, None, Vec::new()));
            }
            return Ok((self.table.delete_matching(&key_names, &params), None, Vec::new()));
        }
        if let Some(rest) = sql.strip_prefix("SELECT ") {
            let from = format!(" FROM {}", target);
            if let Some((columns, tail)) = rest.split_once(&from) {
                // `[Column] AS [label]` reads Column and reports label.
                let (names, labels): (Vec<String>, Vec<String>) = columns
                    .split(", ")
                    .filter_map(|item| {
                        let idents = self.idents(item);
                        Some((idents.first()?.clone(), idents.last()?.clone()))
                    })
                    .unzip();
                let key_names = tail
                    .strip_prefix(" WHERE ")
                    .map(|w| self.idents(w))
                    .unwrap_or_default();
                let header: Arc<[String]> = labels.into();
                let rows = self
                    .table
                    .rows
                    .iter()
                    .filter(|row| self.table.matches(row, &key_names, &params))
                    .map(|row| {
                        let values = names
                            .iter()
                            .map(|n| {
                                self.table
                                    .index_of(n)
                                    .map_or(Value::Null, |i| row[i].clone())
                            })
                            .collect();
                        Row::new(header.clone(), values)
                    })
                    .collect();
                return Ok((0, None, rows));
            }
        }
        Err(unsupported(sql))
    }

    /// Runs a multi-statement script. Returns the row of its final `SELECT`.
    fn run_script(&mut self, sql: &str) -> Result<Option<Row>> {
        let mut result = None;
        let mut vars: HashMap<String, i64> = HashMap::new();
        let mut rowcount = 0;
        for statement in sql.split(";\n").map(|s| s.trim().trim_end_matches(';')) {
            if statement.is_empty() || statement == "SET NOCOUNT ON" {
                continue;
            }
            if let Some(decls) = statement.strip_prefix("DECLARE ") {
                for decl in decls.split(", ") {
                    let (name, init) = decl
                        .split_once(" BIGINT = ")
                        .ok_or_else(|| unsupported(statement))?;
                    let init = init.parse().map_err(|_| unsupported(statement))?;
                    vars.insert(name.to_owned(), init);
                }
                continue;
            }
            if let Some(rest) = statement.strip_prefix("SET @") {
                let (name, source) = rest.split_once(" = ").ok_or_else(|| unsupported(statement))?;
                let name = format!("@{}", name);
                if source != "@@ROWCOUNT" {
                    return Err(unsupported(statement));
                }
                if !vars.contains_key(&name) {
                    return Err(driver_error(format!("must declare the scalar variable {}", name)));
                }
                vars.insert(name, rowcount);
                continue;
            }
            if let Some(items) = statement.strip_prefix("SELECT @") {
                let items = format!("@{}", items);
                let mut labels = Vec::new();
                let mut values = Vec::new();
                for item in items.split(", ") {
                    let (name, label) = item.split_once(" AS ").ok_or_else(|| unsupported(statement))?;
                    let value = vars
                        .get(name)
                        .ok_or_else(|| driver_error(format!("must declare the scalar variable {}", name)))?;
                    labels.push(self.single_ident(label)?);
                    values.push(Value::I64(*value));
                }
                result = Some(Row::new(labels.into(), values));
                continue;
            }
            if let Some(body) = statement.strip_prefix("WITH ") {
                result = Some(self.run_ctes(body)?);
                continue;
            }
            rowcount = i64::try_from(self.run_staged(statement)?).unwrap_or(i64::MAX);
        }
        Ok(result)
    }

    /// Data-modifying CTEs followed by a `SELECT` of their counts. Every CTE
    /// sees the target as it was before the statement.
    fn run_ctes(&mut self, body: &str) -> Result<Row> {
        let (ctes, select) = body
            .split_once("\nSELECT ")
            .ok_or_else(|| unsupported(body))?;
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut pending = Vec::new();
        for cte in ctes.split(",\n") {
            let (name, rest) = cte.split_once(" AS ").ok_or_else(|| unsupported(cte))?;
            let (inner, _) = split_paren(rest);
            let inner = inner
                .strip_suffix(" RETURNING 1")
                .ok_or_else(|| unsupported(inner))?;
            let count = match inner.strip_prefix(&format!("INSERT INTO {} ", self.table.name)) {
                Some(insert) => {
                    let rows = self.staged_insert(insert)?;
                    let count = rows.len() as u64;
                    pending.extend(rows);
                    count
                }
                None => self.run_staged(inner)?,
            };
            counts.insert(name.trim().to_owned(), count);
        }
        self.table.rows.extend(pending);

        let mut labels = Vec::new();
        let mut values = Vec::new();
        for item in select.split(", ") {
            let (expr, label) = item.rsplit_once(" AS ").ok_or_else(|| unsupported(item))?;
            let expr = expr.strip_suffix("::BIGINT").unwrap_or(expr);
            let value: i64 = match expr
                .strip_prefix("(SELECT COUNT(*) FROM ")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                Some(name) => {
                    let count = counts
                        .get(name)
                        .ok_or_else(|| driver_error(format!("relation \"{}\" does not exist", name)))?;
                    *count as i64
                }
                None => expr.parse().map_err(|_| unsupported(item))?,
            };
            labels.push(self.single_ident(label)?);
            values.push(Value::I64(value));
        }
        Ok(Row::new(labels.into(), values))
    }

    /// One statement of a staging script; returns the rows it affected.
    fn run_staged(&mut self, statement: &str) -> Result<u64> {
        let target = self.table.name.clone();
        if let Some(rest) = statement.strip_prefix(&format!("INSERT INTO {} ", target)) {
            let rows = self.staged_insert(rest)?;
            let count = rows.len() as u64;
            self.table.rows.extend(rows);
            return Ok(count);
        }
        // UPDATE t SET t.[c] = s.[c] FROM target AS t INNER JOIN staging AS s ON .. WHERE ..
        if let Some(rest) = statement.strip_prefix("UPDATE t SET ") {
            let (set, rest) = rest.split_once(" FROM ").ok_or_else(|| unsupported(statement))?;
            let rest = rest
                .strip_prefix(&format!("{} AS t INNER JOIN ", target))
                .ok_or_else(|| unsupported(statement))?;
            let (staging, rest) = rest.split_once(" AS s ON ").ok_or_else(|| unsupported(statement))?;
            let (on, filter) = rest.split_once(" WHERE ").ok_or_else(|| unsupported(statement))?;
            return self.staged_update(staging, set, &format!("{} AND {}", on, filter));
        }
        // UPDATE target AS t SET "c" = s."c" FROM staging AS s WHERE ..
        if let Some(rest) = statement.strip_prefix(&format!("UPDATE {} AS t SET ", target)) {
            let (set, rest) = rest.split_once(" FROM ").ok_or_else(|| unsupported(statement))?;
            let (staging, predicate) = rest.split_once(" AS s WHERE ").ok_or_else(|| unsupported(statement))?;
            return self.staged_update(staging, set, predicate);
        }
        if let Some(rest) = statement.strip_prefix(&format!("DELETE t FROM {} AS t INNER JOIN ", target)) {
            let (staging, rest) = rest.split_once(" AS s ON ").ok_or_else(|| unsupported(statement))?;
            let (on, filter) = rest.split_once(" WHERE ").ok_or_else(|| unsupported(statement))?;
            return self.staged_delete(staging, &format!("{} AND {}", on, filter));
        }
        if let Some(rest) = statement.strip_prefix(&format!("DELETE FROM {} AS t USING ", target)) {
            let (staging, predicate) = rest.split_once(" AS s WHERE ").ok_or_else(|| unsupported(statement))?;
            return self.staged_delete(staging, predicate);
        }
        if let Some(rest) = statement
            .strip_prefix("CREATE CLUSTERED INDEX ")
            .and_then(|r| r.split_once(" ON ").map(|(_, on)| on))
            .or_else(|| statement.strip_prefix("CREATE INDEX ON "))
        {
            let (staging, columns) = rest.split_once(" (").ok_or_else(|| unsupported(statement))?;
            for column in self.idents(columns) {
                self.staging_column(staging, &column)?;
            }
            return Ok(0);
        }
        if let Some(staging) = statement.strip_prefix("ANALYZE ") {
            self.staging_table(staging)?;
            return Ok(0);
        }
        if let Some(staging) = statement.strip_prefix("DROP TABLE ") {
            self.staging
                .remove(staging)
                .ok_or_else(|| driver_error(format!("cannot drop {}: it does not exist", staging)))?;
            return Ok(0);
        }
        Err(unsupported(statement))
    }

    /// `(cols) SELECT s.cols FROM staging AS s WHERE ..`: the rows it would add.
    fn staged_insert(&mut self, rest: &str) -> Result<Vec<Vec<Value>>> {
        let (columns, tail) = split_paren(rest);
        let names = self.idents(columns);
        for name in &names {
            self.target_column(name)?;
        }
        let select = tail.trim_start().strip_prefix("SELECT ").ok_or_else(|| unsupported(rest))?;
        let (picks, source) = select.split_once(" FROM ").ok_or_else(|| unsupported(rest))?;
        let (staging, filter) = source.split_once(" AS s WHERE ").ok_or_else(|| unsupported(rest))?;
        let mut sources = Vec::new();
        for pick in picks.split(", ") {
            match self.operand(pick)? {
                Operand::Staging(column) => sources.push(self.staging_column(staging, &column)?),
                _ => return Err(unsupported(pick)),
            }
        }
        if sources.len() != names.len() {
            return Err(driver_error(format!(
                "INSERT names {} columns but selects {}",
                names.len(),
                sources.len()
            )));
        }
        let (_, selected) = self.staged(staging, filter)?;
        let mut rows = Vec::with_capacity(selected.len());
        for source in &selected {
            let values: Vec<Value> = sources.iter().map(|&i| source[i].clone()).collect();
            rows.push(self.table.build_row(&names, &values));
        }
        Ok(rows)
    }

    fn staged_update(&mut self, staging: &str, set: &str, predicate: &str) -> Result<u64> {
        let mut assignments = Vec::new();
        for item in set.split(", ") {
            let (left, right) = item.split_once(" = ").ok_or_else(|| unsupported(item))?;
            match (self.operand(left)?, self.operand(right)?) {
                (Operand::Target(t), Operand::Staging(s)) => {
                    assignments.push((self.target_column(&t)?, self.staging_column(staging, &s)?));
                }
                _ => return Err(unsupported(item)),
            }
        }
        let (joins, selected) = self.staged(staging, predicate)?;
        let mut updated = 0;
        for row in self.table.rows.iter_mut() {
            let Some(source) = selected.iter().find(|source| joined(row.as_slice(), source, &joins)) else {
                continue;
            };
            for &(t, s) in &assignments {
                row[t] = source[s].clone();
            }
            updated += 1;
        }
        Ok(updated)
    }

    fn staged_delete(&mut self, staging: &str, predicate: &str) -> Result<u64> {
        let (joins, selected) = self.staged(staging, predicate)?;
        let before = self.table.rows.len();
        self.table
            .rows
            .retain(|row| !selected.iter().any(|source| joined(row, source, &joins)));
        Ok((before - self.table.rows.len()) as u64)
    }

    /// Binds a predicate over `t` and `s`: the `(target, staging)` column
    /// pairs it joins on, and the staging rows its literal filters keep.
    fn staged(&self, staging: &str, predicate: &str) -> Result<(Vec<(usize, usize)>, Vec<Vec<Value>>)> {
        let mut joins = Vec::new();
        let mut filters = Vec::new();
        for condition in predicate.split(" AND ") {
            let (left, right) = condition
                .split_once(" = ")
                .ok_or_else(|| unsupported(condition))?;
            match (self.operand(left)?, self.operand(right)?) {
                (Operand::Target(t), Operand::Staging(s)) | (Operand::Staging(s), Operand::Target(t)) => {
                    joins.push((self.target_column(&t)?, self.staging_column(staging, &s)?));
                }
                (Operand::Staging(s), Operand::Int(n)) => {
                    filters.push((self.staging_column(staging, &s)?, n));
                }
                _ => return Err(unsupported(condition)),
            }
        }
        let selected = self
            .staging_table(staging)?
            .rows
            .iter()
            .filter(|row| filters.iter().all(|&(i, n)| as_i64(&row[i]) == Some(n)))
            .cloned()
            .collect();
        Ok((joins, selected))
    }

    fn operand(&self, text: &str) -> Result<Operand> {
        let text = text.trim();
        if let Some(column) = text.strip_prefix("t.") {
            return self.single_ident(column).map(Operand::Target);
        }
        if let Some(column) = text.strip_prefix("s.") {
            return self.single_ident(column).map(Operand::Staging);
        }
        if let Ok(n) = text.parse() {
            return Ok(Operand::Int(n));
        }
        // Unqualified columns belong to the target, as in an UPDATE's SET list.
        self.single_ident(text).map(Operand::Target)
    }

    fn single_ident(&self, text: &str) -> Result<String> {
        let mut idents = self.idents(text);
        match (idents.pop(), idents.is_empty()) {
            (Some(ident), true) => Ok(ident),
            _ => Err(unsupported(text)),
        }
    }

    fn staging_table(&self, name: &str) -> Result<&StagingTable> {
        self.staging
            .get(name)
            .ok_or_else(|| driver_error(format!("invalid object name {}", name)))
    }

    fn staging_column(&self, staging: &str, column: &str) -> Result<usize> {
        self.staging_table(staging)?
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| driver_error(format!("invalid column name {} in {}", column, staging)))
    }

    fn target_column(&self, column: &str) -> Result<usize> {
        self.table
            .index_of(column)
            .ok_or_else(|| driver_error(format!("invalid column name {} in {}", column, self.table.name)))
    }
}

#[derive(Debug)]
enum Operand {
    Target(String),
    Staging(String),
    Int(i64),
}

fn joined(target: &[Value], source: &[Value], joins: &[(usize, usize)]) -> bool {
    joins.iter().all(|&(t, s)| same_value(&target[t], &source[s]))
}

fn driver_error(message: String) -> Error {
    Error::driver(std::io::Error::other(message))
}

fn unsupported(sql: &str) -> Error {
    driver_error(format!("mock connection cannot run `{}`", sql))
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::I16(v) => Some((*v).into()),
        Value::I32(v) => Some((*v).into()),
        Value::I64(v) => Some(*v),
        _ => None,
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (as_i64(a), as_i64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Splits `(a, b) rest` into `a, b` and `rest`.
fn split_paren(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let Some(inner) = text.strip_prefix('(') else {
        return ("", text);
    };
    let mut depth = 1;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return (&inner[..i], &inner[i + 1..]);
                }
            }
            _ => {}
        }
    }
    (inner, "")
}

/// Every quoted identifier in `segment`, unescaped, in order.
fn quoted_idents(dialect: Dialect, segment: &str) -> Vec<String> {
    let (open, close) = match dialect {
        Dialect::SqlServer => ('[', ']'),
        Dialect::Postgres => ('"', '"'),
    };
    let mut out = Vec::new();
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        if c != open {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == close {
                if chars.peek() == Some(&close) {
                    chars.next();
                    ident.push(close);
                    continue;
                }
                break;
            }
            ident.push(c);
        }
        out.push(ident);
    }
    out
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn execute(&mut self, command: Command) -> Result<u64> {
        let delay = self.delay;
        let timeout = command.timeout;
        with_timeout(timeout, async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.run(&command).map(|(affected, _, _)| affected)
        })
        .await
    }

    fn fetch<'c>(&'c mut self, command: Command) -> BoxStream<'c, Result<Row>> {
        match self.run(&command) {
            Ok((_, Some(counts), _)) => Box::pin(stream::iter(vec![Ok(counts)])),
            Ok((_, None, rows)) => Box::pin(stream::iter(rows.into_iter().map(Ok))),
            Err(err) => Box::pin(stream::iter(vec![Err(err)])),
        }
    }

    async fn bulk_load(&mut self, load: BulkLoad<'_>) -> Result<u64> {
        self.record(&format!("COPY {}", load.table))?;
        let staging = self.staging.get_mut(load.table).ok_or_else(|| {
            Error::driver(std::io::Error::other(format!("{} does not exist", load.table)))
        })?;
        if !staging.columns.iter().map(String::as_str).eq(load.columns.iter().copied()) {
            return Err(driver_error(format!(
                "{} has columns {:?}, load sends {:?}",
                load.table, staging.columns, load.columns
            )));
        }
        staging.rows.extend(load.rows.iter().cloned());
        self.loaded_rows += load.rows.len();
        Ok(load.rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::sql::{ColumnModel, StagingScript, TableModel};
    use crate::types::{DbType, PostgresType, SqlServerType};

    fn people() -> MockTable {
        MockTable::new("[dbo].[People]", &["Id", "Name"], &["Id"])
            .with_identity("Id")
            .with_rows(vec![vec![Value::I32(1), Value::Text("ann".into())]])
    }

    #[test]
    fn idents_unescape() {
        assert_eq!(
            quoted_idents(Dialect::SqlServer, "[a]]b], [c]"),
            vec!["a]b".to_owned(), "c".to_owned()]
        );
        assert_eq!(quoted_idents(Dialect::Postgres, "\"x\" = $1"), vec!["x".to_owned()]);
    }

    #[tokio::test]
    async fn insert_assigns_identity_after_seeded_rows() {
        let mut conn = MockConnection::new(Dialect::SqlServer, people());
        let cmd = Command::new("INSERT INTO [dbo].[People] ([Name]) VALUES (@p1), (@p2)").with_params(vec![
            crate::value::ParamSpec::new("Name", crate::types::DbType::SqlServer(crate::types::SqlServerType::NVarChar))
                .bind("bob"),
            crate::value::ParamSpec::new("Name", crate::types::DbType::SqlServer(crate::types::SqlServerType::NVarChar))
                .bind("cy"),
        ]);
        assert_eq!(conn.execute(cmd).await.unwrap(), 2);
        let ids: Vec<_> = conn.table().rows().iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![Value::I32(1), Value::I64(2), Value::I64(3)]);
    }

    #[tokio::test]
    async fn unknown_statements_fail() {
        let mut conn = MockConnection::new(Dialect::SqlServer, people());
        assert!(conn.execute(Command::new("VACUUM")).await.is_err());
        assert_eq!(conn.statements(), &["VACUUM".to_owned()]);
    }

    #[tokio::test]
    async fn injected_failures_surface() {
        let mut conn = MockConnection::new(Dialect::SqlServer, people()).fail_on("TRUNCATE");
        let err = conn
            .execute(Command::new("TRUNCATE TABLE [dbo].[People]"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Driver(_)));
        assert_eq!(conn.table().rows().len(), 1);
    }

    fn readings(dialect: Dialect) -> (TableModel, MockConnection) {
        let (int, float) = match dialect {
            Dialect::SqlServer => (DbType::SqlServer(SqlServerType::Int), DbType::SqlServer(SqlServerType::Float)),
            Dialect::Postgres => (
                DbType::Postgres(PostgresType::Integer),
                DbType::Postgres(PostgresType::DoublePrecision),
            ),
        };
        let model = TableModel {
            dialect,
            schema: dialect.default_schema().into(),
            name: "Readings".into(),
            columns: vec![
                ColumnModel::new("sensor", int),
                ColumnModel::new("slot", int),
                ColumnModel::new("value", float),
            ],
            keys: vec!["sensor".into(), "slot".into()],
            identity: Vec::new(),
        };
        let table = MockTable::new(model.qualified_name(), &["sensor", "slot", "value"], &["sensor", "slot"])
            .with_rows(vec![reading(1, 1, 10.0), reading(1, 2, 20.0), reading(2, 1, 30.0)]);
        (model, MockConnection::new(dialect, table))
    }

    fn reading(sensor: i32, slot: i32, value: f64) -> Vec<Value> {
        vec![Value::I32(sensor), Value::I32(slot), Value::F64(value)]
    }

    fn staged(sensor: i32, slot: i32, value: f64, tag: i16) -> Vec<Value> {
        let mut row = reading(sensor, slot, value);
        row.push(Value::I16(tag));
        row
    }

    /// Creates and loads the staging table, then runs `apply`.
    async fn run_apply(conn: &mut MockConnection, script: &StagingScript, apply: &str) -> Result<Row> {
        let rows = vec![
            staged(3, 1, 5.0, 1),
            staged(1, 2, 99.0, 2),
            staged(2, 2, 7.0, 2),
            staged(2, 1, 0.0, 3),
        ];
        conn.execute(Command::new(script.create.clone())).await?;
        let columns: Vec<&str> = script.columns.iter().map(String::as_str).collect();
        conn.bulk_load(BulkLoad {
            table: &script.table,
            columns: &columns,
            rows: &rows,
            timeout: None,
        })
        .await?;
        let mut results: Vec<Result<Row>> = conn.fetch(Command::new(apply.to_owned())).collect().await;
        results.pop().unwrap_or(Err(Error::MissingCounts))
    }

    fn counts(row: &Row) -> (i64, i64, i64) {
        (
            row.get("inserted").unwrap(),
            row.get("updated").unwrap(),
            row.get("deleted").unwrap(),
        )
    }

    fn sorted_rows(conn: &MockConnection) -> Vec<Vec<Value>> {
        let mut rows = conn.table().rows().to_vec();
        rows.sort_by_key(|r| (as_i64(&r[0]), as_i64(&r[1])));
        rows
    }

    #[tokio::test]
    async fn staging_scripts_join_on_every_key_column() {
        for dialect in Dialect::ALL {
            for indexed in [false, true] {
                let (model, mut conn) = readings(dialect);
                let script = model.staging().unwrap();
                let apply = if indexed { &script.apply_indexed } else { &script.apply };
                let row = run_apply(&mut conn, &script, apply).await.unwrap();
                assert_eq!(row.columns(), ["inserted", "updated", "deleted"]);
                assert_eq!(counts(&row), (1, 1, 1), "{:?}", dialect);
                assert_eq!(
                    sorted_rows(&conn),
                    vec![reading(1, 1, 10.0), reading(1, 2, 99.0), reading(3, 1, 5.0)]
                );
                assert!(conn.staging_tables().is_empty());
            }
        }
    }

    #[tokio::test]
    async fn staging_scripts_run_as_written() {
        let (model, mut conn) = readings(Dialect::SqlServer);
        let script = model.staging().unwrap();
        // Joining on the sensor alone widens the update and delete.
        let apply = script.apply.replace("t.[slot] = s.[slot]", "t.[sensor] = s.[sensor]");
        let row = run_apply(&mut conn, &script, &apply).await.unwrap();
        assert_eq!(counts(&row), (1, 3, 1));
        assert_eq!(
            sorted_rows(&conn),
            vec![reading(1, 1, 99.0), reading(1, 2, 99.0), reading(3, 1, 5.0)]
        );

        let (model, mut conn) = readings(Dialect::Postgres);
        let script = model.staging().unwrap();
        let apply = script.apply.replace("s.\"__op\" = 3", "s.\"__op\" = 2");
        let row = run_apply(&mut conn, &script, &apply).await.unwrap();
        assert_eq!(counts(&row), (1, 1, 1));
        assert_eq!(sorted_rows(&conn), vec![reading(1, 1, 10.0), reading(2, 1, 30.0), reading(3, 1, 5.0)]);
    }

    #[tokio::test]
    async fn staging_scripts_reject_unknown_columns_and_tables() {
        let (model, mut conn) = readings(Dialect::SqlServer);
        let script = model.staging().unwrap();
        let apply = script.apply.replace("s.[value]", "s.[reading]");
        let err = run_apply(&mut conn, &script, &apply).await.unwrap_err();
        assert!(matches!(err, Error::Driver(_)));

        let (model, mut conn) = readings(Dialect::Postgres);
        let script = model.staging().unwrap();
        let apply = script.apply.replace("DROP TABLE \"Readings_bulk\"", "DROP TABLE \"Other_bulk\"");
        assert!(run_apply(&mut conn, &script, &apply).await.is_err());
    }
}
