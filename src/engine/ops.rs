//! Single-pass implementations of each step.
//!
//! Every function consumes one tabular value and builds the next. None of
//! them reads the clock, draws randomness, or iterates a hash map, so the
//! output depends only on the step and its input.

use std::collections::BTreeMap;

use serde_json::Value;

use super::cell::{boolean, loosely_equal, number_value, numeric, SortKey};
use crate::spec::{
    AggregateFn, Aggregation, DeriveOp, FilterOp, Keep, Normalization, Operand, Predicate, Step,
};
use crate::table::{cell_text, is_blank, Row, TabularValue};
use crate::validation::MAX_SAMPLE_ROWS;

/// A failure inside one step, before it is attributed to an operation index.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub message: String,
    pub sample: Vec<Row>,
}

impl StepFailure {
    fn new(message: impl Into<String>, sample: impl IntoIterator<Item = Row>) -> Self {
        Self {
            message: message.into(),
            sample: sample.into_iter().take(MAX_SAMPLE_ROWS).collect(),
        }
    }
}

type StepResult = Result<TabularValue, StepFailure>;

/// Applies one decoded step.
pub fn apply(step: &Step, input: TabularValue) -> StepResult {
    match step {
        Step::Filter { field, predicate } => filter(input, field, predicate),
        Step::Normalize {
            field,
            normalization,
        } => normalize(input, field, *normalization),
        Step::Deduplicate {
            key,
            keep,
            order_by,
        } => deduplicate(input, key, *keep, order_by.as_deref()),
        Step::Derive {
            name,
            op,
            inputs,
            separator,
        } => derive(input, name, *op, inputs, separator),
        Step::Sort { by, descending } => sort(input, by, *descending),
        Step::SelectColumns { columns } => select(input, columns),
        Step::DropColumns { columns } => drop_columns(input, columns),
        Step::RenameColumns { mapping } => rename(input, mapping),
        Step::FillMissing { field, value } => fill_missing(input, field, value),
        Step::Aggregate {
            group_by,
            aggregations,
        } => aggregate(input, group_by, aggregations),
    }
}

fn require_columns<'a>(
    input: &TabularValue,
    columns: impl IntoIterator<Item = &'a String>,
) -> Result<(), StepFailure> {
    for column in columns {
        if !input.has_column(column) {
            return Err(StepFailure::new(
                format!(
                    "column '{}' not found (available: {})",
                    column,
                    input.headers().join(", ")
                ),
                input.rows().iter().cloned(),
            ));
        }
    }
    Ok(())
}

fn rebuild(headers: Vec<String>, rows: Vec<Row>) -> StepResult {
    TabularValue::from_rows(headers, rows)
        .map_err(|e| StepFailure::new(format!("produced an invalid table: {}", e), Vec::new()))
}

/// Fails with the offending rows if any were collected.
fn fail_if_any(offending: Vec<Row>, message: impl FnOnce() -> String) -> Result<(), StepFailure> {
    if offending.is_empty() {
        Ok(())
    } else {
        Err(StepFailure::new(message(), offending))
    }
}

fn filter(input: TabularValue, field: &str, predicate: &Predicate) -> StepResult {
    require_columns(&input, [&field.to_string()])?;

    let mut offending = Vec::new();
    let (headers, rows) = input.into_parts();
    let mut kept = Vec::with_capacity(rows.len());

    for row in rows {
        let cell = row.get(field).unwrap_or(&Value::Null);
        match matches(cell, predicate) {
            Ok(true) => kept.push(row),
            Ok(false) => {}
            Err(()) => {
                if offending.len() < MAX_SAMPLE_ROWS {
                    offending.push(row);
                }
            }
        }
    }

    fail_if_any(offending, || {
        format!("column '{}' holds values that are not numeric", field)
    })?;
    rebuild(headers, kept)
}

fn matches(cell: &Value, predicate: &Predicate) -> Result<bool, ()> {
    match predicate {
        Predicate::Empty => Ok(is_blank(cell)),
        Predicate::NotEmpty => Ok(!is_blank(cell)),
        Predicate::Pattern(regex) => Ok(regex.is_match(&cell_text(cell))),
        Predicate::Compare(op, target) => match op {
            FilterOp::Eq => Ok(loosely_equal(cell, target)),
            FilterOp::Ne => Ok(!loosely_equal(cell, target)),
            FilterOp::Contains => Ok(cell_text(cell).contains(&cell_text(target))),
            FilterOp::StartsWith => Ok(cell_text(cell).starts_with(&cell_text(target))),
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                compare(cell, *op, target)
            }
            FilterOp::Matches | FilterOp::Empty | FilterOp::NotEmpty => Ok(false),
        },
    }
}

fn compare(cell: &Value, op: FilterOp, target: &Value) -> Result<bool, ()> {
    if is_blank(cell) {
        return Ok(false);
    }
    let ordering = if target.is_number() {
        let Some(Ok(bound)) = numeric(target) else {
            return Err(());
        };
        match numeric(cell) {
            Some(Ok(n)) => n.total_cmp(&bound),
            _ => return Err(()),
        }
    } else {
        cell_text(cell).as_str().cmp(cell_text(target).as_str())
    };

    Ok(match op {
        FilterOp::Gt => ordering.is_gt(),
        FilterOp::Gte => ordering.is_ge(),
        FilterOp::Lt => ordering.is_lt(),
        FilterOp::Lte => ordering.is_le(),
        _ => false,
    })
}

fn normalize(input: TabularValue, field: &str, normalization: Normalization) -> StepResult {
    require_columns(&input, [&field.to_string()])?;

    let (headers, rows) = input.into_parts();
    let mut out = Vec::with_capacity(rows.len());
    let mut offending = Vec::new();

    for mut row in rows {
        let cell = row.get(field).cloned().unwrap_or(Value::Null);
        match normalize_cell(&cell, normalization) {
            Ok(value) => {
                row.insert(field.to_string(), value);
            }
            Err(()) => {
                if offending.len() < MAX_SAMPLE_ROWS {
                    offending.push(row.clone());
                }
            }
        }
        out.push(row);
    }

    fail_if_any(offending, || {
        let target = match normalization {
            Normalization::ToBoolean => "boolean",
            _ => "number",
        };
        format!("column '{}' holds values that cannot be read as a {}", field, target)
    })?;
    rebuild(headers, out)
}

fn normalize_cell(cell: &Value, normalization: Normalization) -> Result<Value, ()> {
    if cell.is_null() {
        return Ok(Value::Null);
    }
    let text = cell_text(cell);
    let value = match normalization {
        Normalization::Lowercase => Value::String(text.to_lowercase()),
        Normalization::Uppercase => Value::String(text.to_uppercase()),
        Normalization::Trim => Value::String(text.trim().to_string()),
        Normalization::CollapseWhitespace => {
            Value::String(text.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        Normalization::DigitsOnly => {
            Value::String(text.chars().filter(char::is_ascii_digit).collect())
        }
        Normalization::ToNumber => match numeric(cell) {
            None => Value::Null,
            Some(Ok(n)) => number_value(n).ok_or(())?,
            Some(Err(())) => return Err(()),
        },
        Normalization::ToBoolean => match boolean(cell) {
            None => Value::Null,
            Some(Ok(b)) => Value::Bool(b),
            Some(Err(())) => return Err(()),
        },
    };
    Ok(value)
}

fn key_of(row: &Row, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|c| row.get(c).map(cell_text).unwrap_or_default())
        .collect()
}

fn deduplicate(
    input: TabularValue,
    key: &[String],
    keep: Keep,
    order_by: Option<&str>,
) -> StepResult {
    require_columns(&input, key)?;
    if let Some(column) = order_by {
        require_columns(&input, [&column.to_string()])?;
    }

    let (headers, rows) = input.into_parts();

    // Survivor index per group, with groups listed in first-appearance order.
    let mut groups: BTreeMap<Vec<String>, usize> = BTreeMap::new();
    let mut survivors: Vec<usize> = Vec::new();

    for (idx, row) in rows.iter().enumerate() {
        let group_key = key_of(row, key);
        match groups.get(&group_key) {
            None => {
                groups.insert(group_key, survivors.len());
                survivors.push(idx);
            }
            Some(&slot) => {
                let current = survivors[slot];
                if replaces(&rows[current], row, keep, order_by) {
                    survivors[slot] = idx;
                }
            }
        }
    }

    let mut rows: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
    let kept = survivors
        .into_iter()
        .filter_map(|idx| rows[idx].take())
        .collect();
    rebuild(headers, kept)
}

/// Whether a later duplicate replaces the current survivor.
///
/// Without `order_by`, `first` keeps the earliest row and `last` the latest.
/// With `order_by`, `first` keeps the lowest value and `last` the highest;
/// ties fall back to position.
fn replaces(current: &Row, candidate: &Row, keep: Keep, order_by: Option<&str>) -> bool {
    let Some(column) = order_by else {
        return keep == Keep::Last;
    };
    let current_key = SortKey::of(current.get(column).unwrap_or(&Value::Null));
    let candidate_key = SortKey::of(candidate.get(column).unwrap_or(&Value::Null));
    match keep {
        Keep::First => candidate_key < current_key,
        Keep::Last => candidate_key >= current_key,
    }
}

fn derive(
    input: TabularValue,
    name: &str,
    op: DeriveOp,
    inputs: &[Operand],
    separator: &str,
) -> StepResult {
    let referenced: Vec<String> = inputs
        .iter()
        .filter_map(|operand| match operand {
            Operand::Column(c) => Some(c.clone()),
            Operand::Literal(_) => None,
        })
        .collect();
    require_columns(&input, &referenced)?;

    let (mut headers, rows) = input.into_parts();
    if !headers.iter().any(|h| h == name) {
        headers.push(name.to_string());
    }

    let mut out = Vec::with_capacity(rows.len());
    let mut offending = Vec::new();
    let mut reason = String::new();

    for mut row in rows {
        match derive_cell(&row, op, inputs, separator) {
            Ok(value) => {
                row.insert(name.to_string(), value);
            }
            Err(why) => {
                if offending.is_empty() {
                    reason = why;
                }
                if offending.len() < MAX_SAMPLE_ROWS {
                    offending.push(row.clone());
                }
                row.insert(name.to_string(), Value::Null);
            }
        }
        out.push(row);
    }

    fail_if_any(offending, || format!("cannot derive '{}': {}", name, reason))?;
    rebuild(headers, out)
}

fn operand_value<'a>(row: &'a Row, operand: &'a Operand) -> &'a Value {
    match operand {
        Operand::Column(c) => row.get(c).unwrap_or(&Value::Null),
        Operand::Literal(v) => v,
    }
}

fn derive_cell(row: &Row, op: DeriveOp, inputs: &[Operand], separator: &str) -> Result<Value, String> {
    match op {
        DeriveOp::Copy | DeriveOp::Constant => Ok(inputs
            .first()
            .map(|operand| operand_value(row, operand).clone())
            .unwrap_or(Value::Null)),
        DeriveOp::Concat => Ok(Value::String(
            inputs
                .iter()
                .map(|operand| cell_text(operand_value(row, operand)))
                .collect::<Vec<_>>()
                .join(separator),
        )),
        DeriveOp::Add | DeriveOp::Subtract | DeriveOp::Multiply | DeriveOp::Divide => {
            let mut numbers = Vec::with_capacity(inputs.len());
            for operand in inputs {
                let value = operand_value(row, operand);
                match numeric(value) {
                    // A blank operand yields a blank result.
                    None => return Ok(Value::Null),
                    Some(Ok(n)) => numbers.push(n),
                    Some(Err(())) => {
                        return Err(format!("'{}' is not numeric", cell_text(value)));
                    }
                }
            }
            let (first, rest) = numbers
                .split_first()
                .ok_or_else(|| "no inputs".to_string())?;
            let mut acc = *first;
            for n in rest {
                acc = match op {
                    DeriveOp::Add => acc + n,
                    DeriveOp::Subtract => acc - n,
                    DeriveOp::Multiply => acc * n,
                    _ => {
                        if *n == 0.0 {
                            return Err("division by zero".to_string());
                        }
                        acc / n
                    }
                };
            }
            number_value(acc).ok_or_else(|| "result is not a finite number".to_string())
        }
    }
}

fn sort(input: TabularValue, by: &[String], descending: bool) -> StepResult {
    require_columns(&input, by)?;

    let (headers, rows) = input.into_parts();
    let mut keyed: Vec<(Vec<SortKey>, Row)> = rows
        .into_iter()
        .map(|row| {
            let key = by
                .iter()
                .map(|c| SortKey::of(row.get(c).unwrap_or(&Value::Null)))
                .collect();
            (key, row)
        })
        .collect();

    // `sort_by` is stable, so equal keys keep their input order either way.
    if descending {
        keyed.sort_by(|a, b| b.0.cmp(&a.0));
    } else {
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
    }

    rebuild(headers, keyed.into_iter().map(|(_, row)| row).collect())
}

fn select(input: TabularValue, columns: &[String]) -> StepResult {
    require_columns(&input, columns)?;

    let (_, rows) = input.into_parts();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            columns
                .iter()
                .map(|c| (c.clone(), row.remove(c).unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    rebuild(columns.to_vec(), rows)
}

fn drop_columns(input: TabularValue, columns: &[String]) -> StepResult {
    require_columns(&input, columns)?;

    let (headers, rows) = input.into_parts();
    let headers = headers
        .into_iter()
        .filter(|h| !columns.contains(h))
        .collect();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            for c in columns {
                row.remove(c);
            }
            row
        })
        .collect();
    rebuild(headers, rows)
}

fn rename(input: TabularValue, mapping: &[(String, String)]) -> StepResult {
    require_columns(&input, mapping.iter().map(|(from, _)| from))?;

    let target_of = |header: &String| -> String {
        mapping
            .iter()
            .find(|(from, _)| from == header)
            .map(|(_, to)| to.clone())
            .unwrap_or_else(|| header.clone())
    };

    let new_headers: Vec<String> = input.headers().iter().map(target_of).collect();
    for (i, header) in new_headers.iter().enumerate() {
        if new_headers[..i].contains(header) {
            return Err(StepFailure::new(
                format!("renaming would duplicate column '{}'", header),
                Vec::new(),
            ));
        }
    }

    let (headers, rows) = input.into_parts();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            headers
                .iter()
                .zip(&new_headers)
                .map(|(old, new)| (new.clone(), row.remove(old).unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    rebuild(new_headers, rows)
}

fn fill_missing(input: TabularValue, field: &str, value: &Value) -> StepResult {
    require_columns(&input, [&field.to_string()])?;

    let (headers, rows) = input.into_parts();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            if row.get(field).map(is_blank).unwrap_or(true) {
                row.insert(field.to_string(), value.clone());
            }
            row
        })
        .collect();
    rebuild(headers, rows)
}

fn aggregate(input: TabularValue, group_by: &[String], aggregations: &[Aggregation]) -> StepResult {
    require_columns(&input, group_by)?;
    require_columns(&input, aggregations.iter().filter_map(|a| a.column.as_ref()))?;

    let (_, rows) = input.into_parts();

    // Member row indices per group, groups in first-appearance order.
    let mut index: BTreeMap<Vec<String>, usize> = BTreeMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    if group_by.is_empty() {
        groups.push((0..rows.len()).collect());
    } else {
        for (idx, row) in rows.iter().enumerate() {
            let key = key_of(row, group_by);
            match index.get(&key) {
                Some(&slot) => groups[slot].push(idx),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![idx]);
                }
            }
        }
    }

    let mut headers: Vec<String> = group_by.to_vec();
    headers.extend(aggregations.iter().map(|a| a.output.clone()));

    let mut out = Vec::with_capacity(groups.len());
    for members in &groups {
        let mut row = Row::new();
        for column in group_by {
            let value = members
                .first()
                .and_then(|&i| rows[i].get(column))
                .cloned()
                .unwrap_or(Value::Null);
            row.insert(column.clone(), value);
        }
        for aggregation in aggregations {
            let value = aggregate_cell(&rows, members, aggregation)?;
            row.insert(aggregation.output.clone(), value);
        }
        out.push(row);
    }

    rebuild(headers, out)
}

fn aggregate_cell(
    rows: &[Row],
    members: &[usize],
    aggregation: &Aggregation,
) -> Result<Value, StepFailure> {
    let Some(column) = aggregation.column.as_deref() else {
        return Ok(Value::from(members.len() as u64));
    };

    let values: Vec<(&Row, &Value)> = members
        .iter()
        .map(|&i| (&rows[i], rows[i].get(column).unwrap_or(&Value::Null)))
        .filter(|(_, v)| !is_blank(v))
        .collect();

    match aggregation.function {
        AggregateFn::Count => Ok(Value::from(values.len() as u64)),
        AggregateFn::Min => Ok(values
            .iter()
            .min_by_key(|(_, v)| SortKey::of(v))
            .map(|(_, v)| (*v).clone())
            .unwrap_or(Value::Null)),
        AggregateFn::Max => Ok(values
            .iter()
            .rev()
            .max_by_key(|(_, v)| SortKey::of(v))
            .map(|(_, v)| (*v).clone())
            .unwrap_or(Value::Null)),
        AggregateFn::Sum | AggregateFn::Mean => {
            let mut total = 0.0;
            let mut offending = Vec::new();
            for (row, value) in &values {
                match numeric(value) {
                    Some(Ok(n)) => total += n,
                    _ => {
                        if offending.len() < MAX_SAMPLE_ROWS {
                            offending.push((*row).clone());
                        }
                    }
                }
            }
            fail_if_any(offending, || {
                format!("column '{}' holds values that are not numeric", column)
            })?;

            let result = if aggregation.function == AggregateFn::Sum {
                total
            } else if values.is_empty() {
                return Ok(Value::Null);
            } else {
                total / values.len() as f64
            };
            number_value(result).ok_or_else(|| {
                StepFailure::new(
                    format!("aggregate over '{}' is not a finite number", column),
                    Vec::new(),
                )
            })
        }
    }
}
