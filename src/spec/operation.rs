//! Operations: one named step of a pipeline specification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed operation vocabulary.
///
/// Every kind is single-pass over its input rows, so no operation can loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Filter,
    NormalizeField,
    Deduplicate,
    DeriveColumn,
    Sort,
    SelectColumns,
    DropColumns,
    RenameColumns,
    FillMissing,
    Aggregate,
}

impl OperationKind {
    pub const ALL: [OperationKind; 10] = [
        OperationKind::Filter,
        OperationKind::NormalizeField,
        OperationKind::Deduplicate,
        OperationKind::DeriveColumn,
        OperationKind::Sort,
        OperationKind::SelectColumns,
        OperationKind::DropColumns,
        OperationKind::RenameColumns,
        OperationKind::FillMissing,
        OperationKind::Aggregate,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Filter => "filter",
            OperationKind::NormalizeField => "normalize-field",
            OperationKind::Deduplicate => "deduplicate",
            OperationKind::DeriveColumn => "derive-column",
            OperationKind::Sort => "sort",
            OperationKind::SelectColumns => "select-columns",
            OperationKind::DropColumns => "drop-columns",
            OperationKind::RenameColumns => "rename-columns",
            OperationKind::FillMissing => "fill-missing",
            OperationKind::Aggregate => "aggregate",
        }
    }

    /// Looks up a kind by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single step as produced by a generator.
///
/// The kind is kept as a raw string so that a specification naming an unknown
/// kind can still be loaded and reported as a structural error rather than
/// failing to deserialize. Parameters are serialized flat next to `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: String,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

impl Operation {
    /// Creates an operation from a kind name and a JSON object of parameters.
    ///
    /// Non-object `parameters` values yield an operation with no parameters.
    pub fn new(kind: impl Into<String>, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            parameters,
        }
    }

    /// The kind, if it names a member of the vocabulary.
    pub fn known_kind(&self) -> Option<OperationKind> {
        OperationKind::parse(&self.kind)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}
