//! Per-kind parameter schemas and the structural gate.

use serde_json::Value;

use super::model::PipelineSpecification;
use super::operation::{Operation, OperationKind};
use super::step::Step;
use crate::validation::ValidationError;

/// JSON shape a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Bool,
    /// A single column name or a list of them.
    StringOrList,
    StringList,
    /// An object mapping strings to strings.
    StringMap,
    /// An array of objects; element shape is checked at decode time.
    ObjectList,
    Any,
}

impl ParamType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Bool => value.is_boolean(),
            ParamType::StringOrList => value.is_string() || is_string_list(value),
            ParamType::StringList => is_string_list(value),
            ParamType::StringMap => value
                .as_object()
                .map(|m| m.values().all(Value::is_string))
                .unwrap_or(false),
            ParamType::ObjectList => value
                .as_array()
                .map(|a| a.iter().all(Value::is_object))
                .unwrap_or(false),
            ParamType::Any => true,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ParamType::String => "a string",
            ParamType::Bool => "a boolean",
            ParamType::StringOrList => "a string or a list of strings",
            ParamType::StringList => "a list of strings",
            ParamType::StringMap => "an object of string values",
            ParamType::ObjectList => "a list of objects",
            ParamType::Any => "any value",
        }
    }
}

fn is_string_list(value: &Value) -> bool {
    value
        .as_array()
        .map(|a| a.iter().all(Value::is_string))
        .unwrap_or(false)
}

/// Declared parameter of an operation kind.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
}

const fn req(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: true,
    }
}

const fn opt(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: false,
    }
}

const FILTER: &[ParamSpec] = &[
    req("field", ParamType::String),
    req("op", ParamType::String),
    opt("value", ParamType::Any),
];
const NORMALIZE_FIELD: &[ParamSpec] = &[
    req("field", ParamType::String),
    req("op", ParamType::String),
];
const DEDUPLICATE: &[ParamSpec] = &[
    req("key", ParamType::StringOrList),
    opt("keep", ParamType::String),
    opt("order_by", ParamType::String),
];
const DERIVE_COLUMN: &[ParamSpec] = &[
    req("name", ParamType::String),
    req("op", ParamType::String),
    req("inputs", ParamType::ObjectList),
    opt("separator", ParamType::String),
];
const SORT: &[ParamSpec] = &[
    req("by", ParamType::StringOrList),
    opt("descending", ParamType::Bool),
];
const COLUMNS: &[ParamSpec] = &[req("columns", ParamType::StringList)];
const RENAME_COLUMNS: &[ParamSpec] = &[req("mapping", ParamType::StringMap)];
const FILL_MISSING: &[ParamSpec] = &[
    req("field", ParamType::String),
    req("value", ParamType::Any),
];
const AGGREGATE: &[ParamSpec] = &[
    req("group_by", ParamType::StringOrList),
    req("aggregations", ParamType::ObjectList),
];

/// Returns the parameter schema for a kind.
pub fn schema_for(kind: OperationKind) -> &'static [ParamSpec] {
    match kind {
        OperationKind::Filter => FILTER,
        OperationKind::NormalizeField => NORMALIZE_FIELD,
        OperationKind::Deduplicate => DEDUPLICATE,
        OperationKind::DeriveColumn => DERIVE_COLUMN,
        OperationKind::Sort => SORT,
        OperationKind::SelectColumns | OperationKind::DropColumns => COLUMNS,
        OperationKind::RenameColumns => RENAME_COLUMNS,
        OperationKind::FillMissing => FILL_MISSING,
        OperationKind::Aggregate => AGGREGATE,
    }
}

/// Checks an operation's parameters against its kind's schema.
///
/// Returns one message per violation: missing required parameters, parameters
/// of the wrong shape, and parameters the kind does not declare.
pub fn check_parameters(kind: OperationKind, op: &Operation) -> Vec<String> {
    let schema = schema_for(kind);
    let mut problems = Vec::new();

    for spec in schema {
        match op.param(spec.name) {
            None if spec.required => {
                problems.push(format!(
                    "{}: missing required parameter '{}'",
                    kind, spec.name
                ));
            }
            Some(value) if !spec.ty.accepts(value) => {
                problems.push(format!(
                    "{}: parameter '{}' must be {}",
                    kind,
                    spec.name,
                    spec.ty.describe()
                ));
            }
            _ => {}
        }
    }

    for name in op.parameters.keys() {
        if !schema.iter().any(|s| s.name == name) {
            problems.push(format!("{}: unknown parameter '{}'", kind, name));
        }
    }

    problems
}

/// Structurally validates a specification without executing it.
///
/// An empty result means every operation names a known kind, satisfies its
/// parameter schema, and decodes into an executable step.
pub fn validate_structure(spec: &PipelineSpecification) -> Vec<ValidationError> {
    if spec.operations.is_empty() {
        return vec![ValidationError::structural(
            None,
            "pipeline has no operations",
        )];
    }

    let mut errors = Vec::new();
    for (idx, op) in spec.operations.iter().enumerate() {
        let Some(kind) = op.known_kind() else {
            errors.push(ValidationError::structural(
                Some(idx),
                format!("unknown operation kind '{}'", op.kind),
            ));
            continue;
        };

        let problems = check_parameters(kind, op);
        if !problems.is_empty() {
            errors.extend(
                problems
                    .into_iter()
                    .map(|msg| ValidationError::structural(Some(idx), msg)),
            );
            continue;
        }

        if let Err(msg) = Step::decode(op) {
            errors.push(ValidationError::structural(Some(idx), msg));
        }
    }

    errors
}
