//! Cell-level coercions and ordering shared by the operations.

use std::cmp::Ordering;

use serde_json::Value;

use crate::table::{cell_text, is_blank};

/// Largest magnitude at which an integral `f64` is emitted as an integer.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Parses a cell as a number. `None` for blank cells, `Some(Err)` when the
/// cell holds something that is not numeric.
pub fn numeric(value: &Value) -> Option<Result<f64, ()>> {
    if is_blank(value) {
        return None;
    }
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Some(parsed.filter(|f| f.is_finite()).ok_or(()))
}

/// Converts a computed number back into a cell. Integral results become
/// integers so that `2 + 3` renders as `5`, not `5.0`.
pub fn number_value(f: f64) -> Option<Value> {
    if !f.is_finite() {
        return None;
    }
    if f.fract() == 0.0 && f.abs() < MAX_EXACT_INT {
        return Some(Value::from(f as i64));
    }
    serde_json::Number::from_f64(f).map(Value::Number)
}

/// Parses a cell as a boolean. Accepts true/false, yes/no, y/n and 1/0.
pub fn boolean(value: &Value) -> Option<Result<bool, ()>> {
    if is_blank(value) {
        return None;
    }
    if let Value::Bool(b) = value {
        return Some(Ok(*b));
    }
    let text = cell_text(value).trim().to_ascii_lowercase();
    Some(match text.as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(()),
    })
}

/// Total order over cells: blanks, then numbers, then text.
#[derive(Debug, Clone)]
pub enum SortKey {
    Blank,
    Number(f64),
    Text(String),
}

impl SortKey {
    pub fn of(value: &Value) -> Self {
        match numeric(value) {
            None => SortKey::Blank,
            Some(Ok(n)) => SortKey::Number(n),
            Some(Err(())) => SortKey::Text(cell_text(value)),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Blank => 0,
            SortKey::Number(_) => 1,
            SortKey::Text(_) => 2,
        }
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Equality used by filters: numeric when both sides are numbers, textual
/// otherwise.
pub fn loosely_equal(cell: &Value, target: &Value) -> bool {
    match (numeric(cell), numeric(target)) {
        (Some(Ok(a)), Some(Ok(b))) => a == b,
        _ => cell_text(cell) == cell_text(target),
    }
}
