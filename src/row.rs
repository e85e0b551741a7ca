//! Result rows

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value, decode_column};

/// Column lookup by position or by name
pub trait ColumnIndex {
    fn position(&self, row: &Row) -> Option<usize>;
    fn describe(&self) -> String;
}

impl ColumnIndex for usize {
    fn position(&self, row: &Row) -> Option<usize> {
        (*self < row.values.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        format!("#{}", self)
    }
}

impl ColumnIndex for &str {
    fn position(&self, row: &Row) -> Option<usize> {
        row.columns.iter().position(|c| c == self)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

/// A single result row. Column names are shared between rows of the same result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get<T: FromValue>(&self, index: impl ColumnIndex) -> Result<T> {
        let missing = || Error::decode(index.describe(), "no such column");
        let pos = index.position(self).ok_or_else(missing)?;
        let value = self.values.get(pos).ok_or_else(missing)?;
        let name = self.columns.get(pos).cloned().unwrap_or_else(|| index.describe());
        decode_column(&name, value)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
