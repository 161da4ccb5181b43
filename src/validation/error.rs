//! Normalized validation findings fed back into the repair loop.

use serde::{Deserialize, Serialize};

use crate::table::Row;

/// Maximum number of rows carried as sample context on a single error.
pub const MAX_SAMPLE_ROWS: usize = 3;

/// Which pass produced a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Malformed specification; never executed.
    Structural,
    /// Failure while applying an operation to data.
    Runtime,
    /// Execution succeeded but the output failed an acceptance check.
    Semantic,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Structural => "structural",
            ErrorCategory::Runtime => "runtime",
            ErrorCategory::Semantic => "semantic",
        };
        write!(f, "{}", name)
    }
}

/// A single validation finding.
///
/// `operation_index` is `None` for whole-pipeline errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub operation_index: Option<usize>,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_context: Option<Vec<Row>>,
}

impl ValidationError {
    fn new(
        category: ErrorCategory,
        operation_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation_index,
            category,
            message: message.into(),
            sample_context: None,
        }
    }

    pub fn structural(operation_index: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Structural, operation_index, message)
    }

    pub fn runtime(operation_index: usize, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Runtime, Some(operation_index), message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Semantic, None, message)
    }

    /// Attaches sample rows, truncated to `MAX_SAMPLE_ROWS`. An empty sample
    /// leaves the context unset.
    pub fn with_sample(mut self, rows: impl IntoIterator<Item = Row>) -> Self {
        let sample: Vec<Row> = rows.into_iter().take(MAX_SAMPLE_ROWS).collect();
        self.sample_context = if sample.is_empty() { None } else { Some(sample) };
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.operation_index {
            Some(idx) => write!(f, "[{}] operation {}: {}", self.category, idx, self.message),
            None => write!(f, "[{}] pipeline: {}", self.category, self.message),
        }
    }
}
