//! Typed decoding of operations into executable steps.
//!
//! Decoding assumes the operation already passed `check_parameters`; it adds
//! the checks a JSON shape cannot express (enum values, operand shapes,
//! regex compilation, cross-parameter rules).

use regex::Regex;
use serde_json::{Map, Value};

use super::operation::{Operation, OperationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    Matches,
    Empty,
    NotEmpty,
}

impl FilterOp {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "contains" => FilterOp::Contains,
            "starts-with" => FilterOp::StartsWith,
            "matches" => FilterOp::Matches,
            "empty" => FilterOp::Empty,
            "not-empty" => FilterOp::NotEmpty,
            _ => return None,
        })
    }

    fn needs_value(&self) -> bool {
        !matches!(self, FilterOp::Empty | FilterOp::NotEmpty)
    }
}

/// A compiled filter predicate.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare(FilterOp, Value),
    Pattern(Regex),
    Empty,
    NotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    Lowercase,
    Uppercase,
    Trim,
    CollapseWhitespace,
    DigitsOnly,
    ToNumber,
    ToBoolean,
}

impl Normalization {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "lowercase" => Normalization::Lowercase,
            "uppercase" => Normalization::Uppercase,
            "trim" => Normalization::Trim,
            "collapse-whitespace" => Normalization::CollapseWhitespace,
            "digits-only" => Normalization::DigitsOnly,
            "to-number" => Normalization::ToNumber,
            "to-boolean" => Normalization::ToBoolean,
            _ => return None,
        })
    }
}

/// Which duplicate survives deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    First,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeriveOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    Copy,
    Constant,
}

impl DeriveOp {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "add" => DeriveOp::Add,
            "subtract" => DeriveOp::Subtract,
            "multiply" => DeriveOp::Multiply,
            "divide" => DeriveOp::Divide,
            "concat" => DeriveOp::Concat,
            "copy" => DeriveOp::Copy,
            "constant" => DeriveOp::Constant,
            _ => return None,
        })
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            DeriveOp::Add | DeriveOp::Subtract | DeriveOp::Multiply | DeriveOp::Divide
        )
    }
}

/// An input to a derived column.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

impl AggregateFn {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "count" => AggregateFn::Count,
            "sum" => AggregateFn::Sum,
            "mean" => AggregateFn::Mean,
            "min" => AggregateFn::Min,
            "max" => AggregateFn::Max,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub column: Option<String>,
    pub function: AggregateFn,
    pub output: String,
}

/// An operation decoded into its executable form.
#[derive(Debug, Clone)]
pub enum Step {
    Filter {
        field: String,
        predicate: Predicate,
    },
    Normalize {
        field: String,
        normalization: Normalization,
    },
    Deduplicate {
        key: Vec<String>,
        keep: Keep,
        order_by: Option<String>,
    },
    Derive {
        name: String,
        op: DeriveOp,
        inputs: Vec<Operand>,
        separator: String,
    },
    Sort {
        by: Vec<String>,
        descending: bool,
    },
    SelectColumns {
        columns: Vec<String>,
    },
    DropColumns {
        columns: Vec<String>,
    },
    RenameColumns {
        mapping: Vec<(String, String)>,
    },
    FillMissing {
        field: String,
        value: Value,
    },
    Aggregate {
        group_by: Vec<String>,
        aggregations: Vec<Aggregation>,
    },
}

impl Step {
    /// Decodes an operation. The error is a human-readable reason.
    pub fn decode(op: &Operation) -> Result<Step, String> {
        let kind = op
            .known_kind()
            .ok_or_else(|| format!("unknown operation kind '{}'", op.kind))?;
        let params = &op.parameters;

        match kind {
            OperationKind::Filter => decode_filter(params),
            OperationKind::NormalizeField => {
                let field = required_str(params, "field")?;
                let name = required_str(params, "op")?;
                let normalization = Normalization::parse(&name)
                    .ok_or_else(|| format!("normalize-field: unsupported op '{}'", name))?;
                Ok(Step::Normalize {
                    field,
                    normalization,
                })
            }
            OperationKind::Deduplicate => {
                let key = non_empty_columns(params, "key", kind)?;
                let keep = match optional_str(params, "keep")?.as_deref() {
                    None | Some("first") => Keep::First,
                    Some("last") => Keep::Last,
                    Some(other) => {
                        return Err(format!("deduplicate: unsupported keep '{}'", other))
                    }
                };
                let order_by = optional_str(params, "order_by")?;
                Ok(Step::Deduplicate {
                    key,
                    keep,
                    order_by,
                })
            }
            OperationKind::DeriveColumn => decode_derive(params),
            OperationKind::Sort => Ok(Step::Sort {
                by: non_empty_columns(params, "by", kind)?,
                descending: params
                    .get("descending")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            OperationKind::SelectColumns => Ok(Step::SelectColumns {
                columns: non_empty_columns(params, "columns", kind)?,
            }),
            OperationKind::DropColumns => Ok(Step::DropColumns {
                columns: non_empty_columns(params, "columns", kind)?,
            }),
            OperationKind::RenameColumns => decode_rename(params),
            OperationKind::FillMissing => Ok(Step::FillMissing {
                field: required_str(params, "field")?,
                value: params.get("value").cloned().unwrap_or(Value::Null),
            }),
            OperationKind::Aggregate => decode_aggregate(params),
        }
    }
}

fn decode_filter(params: &Map<String, Value>) -> Result<Step, String> {
    let field = required_str(params, "field")?;
    let name = required_str(params, "op")?;
    let op = FilterOp::parse(&name).ok_or_else(|| format!("filter: unsupported op '{}'", name))?;
    let value = params.get("value");

    let predicate = match (op, value) {
        (FilterOp::Empty, _) => Predicate::Empty,
        (FilterOp::NotEmpty, _) => Predicate::NotEmpty,
        (op, None) if op.needs_value() => {
            return Err(format!("filter: op '{}' requires a 'value'", name));
        }
        (FilterOp::Matches, Some(v)) => {
            let pattern = v
                .as_str()
                .ok_or_else(|| "filter: 'matches' value must be a string pattern".to_string())?;
            let regex = Regex::new(pattern)
                .map_err(|e| format!("filter: invalid pattern '{}': {}", pattern, e))?;
            Predicate::Pattern(regex)
        }
        (FilterOp::Contains | FilterOp::StartsWith, Some(v)) if !v.is_string() => {
            return Err(format!("filter: op '{}' requires a string value", name));
        }
        (FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte, Some(v))
            if !(v.is_number() || v.is_string()) =>
        {
            return Err(format!(
                "filter: op '{}' requires a number or string value",
                name
            ));
        }
        (op, Some(v)) => Predicate::Compare(op, v.clone()),
        (_, None) => {
            return Err(format!("filter: op '{}' requires a 'value'", name));
        }
    };

    Ok(Step::Filter { field, predicate })
}

fn decode_derive(params: &Map<String, Value>) -> Result<Step, String> {
    let name = required_str(params, "name")?;
    let op_name = required_str(params, "op")?;
    let op = DeriveOp::parse(&op_name)
        .ok_or_else(|| format!("derive-column: unsupported op '{}'", op_name))?;

    let raw_inputs = params
        .get("inputs")
        .and_then(Value::as_array)
        .ok_or_else(|| "derive-column: 'inputs' must be a list".to_string())?;
    let inputs = raw_inputs
        .iter()
        .enumerate()
        .map(|(i, v)| decode_operand(i, v))
        .collect::<Result<Vec<_>, _>>()?;

    let arity_ok = match op {
        DeriveOp::Add | DeriveOp::Subtract | DeriveOp::Multiply | DeriveOp::Divide => {
            inputs.len() >= 2
        }
        DeriveOp::Concat => !inputs.is_empty(),
        DeriveOp::Copy | DeriveOp::Constant => inputs.len() == 1,
    };
    if !arity_ok {
        return Err(format!(
            "derive-column: op '{}' does not accept {} input(s)",
            op_name,
            inputs.len()
        ));
    }
    if op == DeriveOp::Copy && !matches!(inputs[0], Operand::Column(_)) {
        return Err("derive-column: 'copy' input must be a column".to_string());
    }
    if op == DeriveOp::Constant && !matches!(inputs[0], Operand::Literal(_)) {
        return Err("derive-column: 'constant' input must be a value".to_string());
    }
    if op.is_arithmetic() {
        for operand in &inputs {
            if let Operand::Literal(v) = operand {
                if !is_numeric_literal(v) {
                    return Err(format!(
                        "derive-column: '{}' literal {} is not numeric",
                        op_name, v
                    ));
                }
            }
        }
    }

    let separator = optional_str(params, "separator")?;
    if separator.is_some() && op != DeriveOp::Concat {
        return Err("derive-column: 'separator' applies only to 'concat'".to_string());
    }

    Ok(Step::Derive {
        name,
        op,
        inputs,
        separator: separator.unwrap_or_default(),
    })
}

fn decode_operand(index: usize, value: &Value) -> Result<Operand, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("derive-column: input {} must be an object", index))?;
    match (obj.get("column"), obj.get("value"), obj.len()) {
        (Some(Value::String(c)), None, 1) => Ok(Operand::Column(c.clone())),
        (None, Some(v), 1) => Ok(Operand::Literal(v.clone())),
        _ => Err(format!(
            "derive-column: input {} must be {{\"column\": name}} or {{\"value\": literal}}",
            index
        )),
    }
}

fn is_numeric_literal(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().map(f64::is_finite).unwrap_or(false),
        _ => false,
    }
}

fn decode_rename(params: &Map<String, Value>) -> Result<Step, String> {
    let raw = params
        .get("mapping")
        .and_then(Value::as_object)
        .ok_or_else(|| "rename-columns: 'mapping' must be an object".to_string())?;
    if raw.is_empty() {
        return Err("rename-columns: 'mapping' must not be empty".to_string());
    }

    let mut mapping = Vec::with_capacity(raw.len());
    for (from, to) in raw {
        let to = to
            .as_str()
            .ok_or_else(|| format!("rename-columns: target for '{}' must be a string", from))?;
        if to.is_empty() {
            return Err(format!("rename-columns: target for '{}' is empty", from));
        }
        if mapping.iter().any(|(_, t): &(String, String)| t == to) {
            return Err(format!("rename-columns: '{}' is targeted twice", to));
        }
        mapping.push((from.clone(), to.to_string()));
    }
    Ok(Step::RenameColumns { mapping })
}

fn decode_aggregate(params: &Map<String, Value>) -> Result<Step, String> {
    let group_by = columns(params, "group_by")?;
    let raw = params
        .get("aggregations")
        .and_then(Value::as_array)
        .ok_or_else(|| "aggregate: 'aggregations' must be a list".to_string())?;
    if raw.is_empty() {
        return Err("aggregate: 'aggregations' must not be empty".to_string());
    }

    let mut aggregations: Vec<Aggregation> = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let obj = entry
            .as_object()
            .ok_or_else(|| format!("aggregate: aggregation {} must be an object", i))?;
        if let Some(extra) = obj
            .keys()
            .find(|k| !matches!(k.as_str(), "column" | "function" | "as"))
        {
            return Err(format!(
                "aggregate: aggregation {} has unknown field '{}'",
                i, extra
            ));
        }

        let fn_name = obj
            .get("function")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("aggregate: aggregation {} needs a 'function'", i))?;
        let function = AggregateFn::parse(fn_name)
            .ok_or_else(|| format!("aggregate: unsupported function '{}'", fn_name))?;
        let column = match obj.get("column") {
            None => None,
            Some(Value::String(c)) => Some(c.clone()),
            Some(_) => return Err(format!("aggregate: aggregation {} 'column' must be a string", i)),
        };
        if column.is_none() && function != AggregateFn::Count {
            return Err(format!(
                "aggregate: function '{}' requires a 'column'",
                fn_name
            ));
        }
        let output = obj
            .get("as")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("aggregate: aggregation {} needs an 'as' name", i))?
            .to_string();

        if group_by.contains(&output) || aggregations.iter().any(|a| a.output == output) {
            return Err(format!("aggregate: output column '{}' is not unique", output));
        }
        aggregations.push(Aggregation {
            column,
            function,
            output,
        });
    }

    Ok(Step::Aggregate {
        group_by,
        aggregations,
    })
}

fn required_str(params: &Map<String, Value>, name: &str) -> Result<String, String> {
    match params.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(format!("parameter '{}' must not be empty", name)),
        _ => Err(format!("parameter '{}' must be a string", name)),
    }
}

fn optional_str(params: &Map<String, Value>, name: &str) -> Result<Option<String>, String> {
    match params.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(format!("parameter '{}' must be a string", name)),
    }
}

/// Reads a string-or-list parameter as a list of column names.
fn columns(params: &Map<String, Value>, name: &str) -> Result<Vec<String>, String> {
    let list = match params.get(name) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("parameter '{}' must contain only strings", name))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(format!("parameter '{}' must name columns", name)),
    };

    for (i, column) in list.iter().enumerate() {
        if list[..i].contains(column) {
            return Err(format!("parameter '{}' repeats column '{}'", name, column));
        }
    }
    Ok(list)
}

fn non_empty_columns(
    params: &Map<String, Value>,
    name: &str,
    kind: OperationKind,
) -> Result<Vec<String>, String> {
    let list = columns(params, name)?;
    if list.is_empty() {
        return Err(format!("{}: '{}' must name at least one column", kind, name));
    }
    Ok(list)
}
