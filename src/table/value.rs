//! Immutable tabular values.
//!
//! A `TabularValue` is an ordered list of unique headers plus an ordered list
//! of rows, each row mapping every header to a raw JSON value. Pipeline steps
//! never mutate a value in place; they build a new one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{classify, ColumnType};
use crate::error::TableError;

/// A single record keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Typed representation of a parsed dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct TabularValue {
    headers: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Deserialize)]
struct RawTable {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl TryFrom<RawTable> for TabularValue {
    type Error = TableError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        TabularValue::from_rows(raw.headers, raw.rows)
    }
}

impl TabularValue {
    /// Builds a tabular value, checking header uniqueness and row shape.
    ///
    /// # Errors
    ///
    /// Returns `TableError::DuplicateHeader` for repeated headers and
    /// `TableError::Shape` when a row's key set differs from `headers`.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Row>) -> Result<Self, TableError> {
        let mut header_set = BTreeSet::new();
        for header in &headers {
            if !header_set.insert(header.as_str()) {
                return Err(TableError::DuplicateHeader(header.clone()));
            }
        }

        for (idx, row) in rows.iter().enumerate() {
            if let Some(missing) = headers.iter().find(|h| !row.contains_key(h.as_str())) {
                return Err(TableError::Shape {
                    row: idx,
                    reason: format!("missing key '{}'", missing),
                });
            }
            if let Some(extra) = row.keys().find(|k| !header_set.contains(k.as_str())) {
                return Err(TableError::Shape {
                    row: idx,
                    reason: format!("unexpected key '{}'", extra),
                });
            }
        }

        Ok(Self { headers, rows })
    }

    /// Builds a value from positional string records, as produced by a CSV reader.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Shape` when a record has the wrong number of fields.
    pub fn from_records(
        headers: Vec<String>,
        records: impl IntoIterator<Item = Vec<String>>,
    ) -> Result<Self, TableError> {
        let mut rows = Vec::new();
        for (idx, record) in records.into_iter().enumerate() {
            if record.len() != headers.len() {
                return Err(TableError::Shape {
                    row: idx,
                    reason: format!(
                        "expected {} fields, found {}",
                        headers.len(),
                        record.len()
                    ),
                });
            }
            let row: Row = headers
                .iter()
                .cloned()
                .zip(record.into_iter().map(Value::String))
                .collect();
            rows.push(row);
        }
        Self::from_rows(headers, rows)
    }

    /// An empty value with the given headers.
    pub fn empty(headers: Vec<String>) -> Result<Self, TableError> {
        Self::from_rows(headers, Vec::new())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Returns a new value holding at most the first `n` rows.
    pub fn sample(&self, n: usize) -> TabularValue {
        Self {
            headers: self.headers.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Infers the type of a column by majority vote over its non-empty values.
    ///
    /// Ties resolve to `ColumnType::String`; a column with no non-empty values
    /// is `ColumnType::Empty`.
    ///
    /// # Errors
    ///
    /// Returns `TableError::UnknownColumn` if the column does not exist.
    pub fn column_type(&self, name: &str) -> Result<ColumnType, TableError> {
        if !self.has_column(name) {
            return Err(TableError::UnknownColumn(name.to_string()));
        }

        let mut votes: BTreeMap<ColumnType, usize> = BTreeMap::new();
        for row in &self.rows {
            if let Some(kind) = row.get(name).and_then(classify) {
                *votes.entry(kind).or_insert(0) += 1;
            }
        }

        let Some(top) = votes.values().copied().max() else {
            return Ok(ColumnType::Empty);
        };
        let leaders: Vec<ColumnType> = votes
            .iter()
            .filter(|(_, count)| **count == top)
            .map(|(kind, _)| *kind)
            .collect();

        Ok(match leaders.as_slice() {
            [single] => *single,
            _ => ColumnType::String,
        })
    }

    /// Inferred types for every column, in header order.
    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.headers
            .iter()
            .map(|h| {
                let kind = self.column_type(h).unwrap_or(ColumnType::Empty);
                (h.clone(), kind)
            })
            .collect()
    }

    /// Consumes the value, returning its parts.
    pub fn into_parts(self) -> (Vec<String>, Vec<Row>) {
        (self.headers, self.rows)
    }
}
