//! Database rows.
//!
//! A [`Row`] is the shape a backend hands back for a shadow-model instance:
//! an ordered list of column names (shared between rows of one result set)
//! and the matching values.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// A single result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from owned name/value pairs.
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        let (columns, values): (Vec<String>, Vec<Value>) = pairs.into_iter().unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Shared handle to the column names, for building sibling rows.
    pub fn column_names(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a column index.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value for a named column.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Typed value at a column index.
    pub fn get_as<T: FromValue>(&self, idx: usize) -> Result<T> {
        let value = self
            .values
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::Conversion(format!("column index {idx} out of range")))?;
        T::from_value(value)
    }

    /// Typed value for a named column.
    pub fn get_named_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get_named(name)
            .cloned()
            .ok_or_else(|| Error::Conversion(format!("no column named {name}")))?;
        T::from_value(value)
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Keep only the named columns, in the order given. Unknown names are skipped.
    pub fn project(&self, names: &[String]) -> Row {
        let pairs = names
            .iter()
            .filter_map(|name| self.get_named(name).map(|v| (name.clone(), v.clone())))
            .collect();
        Row::from_pairs(pairs)
    }

    /// Consume the row into owned pairs.
    pub fn into_pairs(self) -> Vec<(String, Value)> {
        self.columns.iter().cloned().zip(self.values).collect()
    }
}
