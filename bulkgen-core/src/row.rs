use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// One row read from a forward-only reader.
///
/// Column names are shared between the rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Position of a column, compared case-insensitively.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Decodes the named column.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self.position(name).ok_or_else(|| Error::Decode {
            column: name.to_owned(),
            message: "no such column".to_owned(),
        })?;
        self.get_at(index)
    }

    /// Decodes the column at `index`.
    pub fn get_at<T: FromValue>(&self, index: usize) -> Result<T> {
        let column = || {
            self.columns
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("#{}", index))
        };
        let value = self.values.get(index).cloned().ok_or_else(|| Error::Decode {
            column: column(),
            message: "index out of range".to_owned(),
        })?;
        T::from_value(value).map_err(|message| Error::Decode {
            column: column(),
            message,
        })
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Builds a value from a row. Generated for every valid model.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self>;
}
