//! Column type inference.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inferred type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Date,
    Empty,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Empty => "empty",
        };
        write!(f, "{}", name)
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Classifies a single cell. Returns `None` for empty cells so they do not vote.
pub fn classify(value: &Value) -> Option<ColumnType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnType::Boolean),
        Value::Number(_) => Some(ColumnType::Number),
        Value::String(s) => classify_str(s),
        Value::Array(_) | Value::Object(_) => Some(ColumnType::String),
    }
}

fn classify_str(raw: &str) -> Option<ColumnType> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.parse::<f64>().map(f64::is_finite).unwrap_or(false) {
        return Some(ColumnType::Number);
    }
    if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") {
        return Some(ColumnType::Boolean);
    }
    if is_date(s) {
        return Some(ColumnType::Date);
    }
    Some(ColumnType::String)
}

fn is_date(s: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(s, fmt).is_ok())
        || DateTime::parse_from_rfc3339(s).is_ok()
}

/// True when a cell holds no data: null, or a blank string.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
