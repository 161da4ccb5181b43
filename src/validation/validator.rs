//! Two-pass specification validator.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ValidationError;
use crate::engine::{execute, ExecutionFailure};
use crate::spec::{validate_structure, PipelineSpecification};
use crate::table::TabularValue;

/// Acceptance checks applied to a successful execution's output.
///
/// Every threshold is optional so that deployments decide their own bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticChecks {
    /// Columns the output must contain, in addition to the specification's
    /// own declared outputs.
    #[serde(default)]
    pub required_columns: Vec<String>,
    /// Reject an empty output produced from a non-empty input.
    #[serde(default = "default_true")]
    pub reject_empty_output: bool,
    #[serde(default)]
    pub max_output_rows: Option<usize>,
    /// Upper bound on output rows as a multiple of input rows.
    #[serde(default)]
    pub max_row_growth: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl Default for SemanticChecks {
    fn default() -> Self {
        Self {
            required_columns: Vec::new(),
            reject_empty_output: true,
            max_output_rows: None,
            max_row_growth: None,
        }
    }
}

impl SemanticChecks {
    pub fn with_required_columns(mut self, columns: Vec<String>) -> Self {
        self.required_columns = columns;
        self
    }

    pub fn with_reject_empty_output(mut self, reject: bool) -> Self {
        self.reject_empty_output = reject;
        self
    }

    pub fn with_max_output_rows(mut self, max: usize) -> Self {
        self.max_output_rows = Some(max);
        self
    }

    pub fn with_max_row_growth(mut self, ratio: f64) -> Self {
        self.max_row_growth = Some(ratio);
        self
    }
}

/// Result of validating one candidate specification.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub errors: Vec<ValidationError>,
    /// The execution output, when execution ran and succeeded.
    pub output: Option<TabularValue>,
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks specifications structurally, then semantically against real data.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    checks: SemanticChecks,
}

impl Validator {
    pub fn new(checks: SemanticChecks) -> Self {
        Self { checks }
    }

    pub fn checks(&self) -> &SemanticChecks {
        &self.checks
    }

    /// Runs both passes in order. A structural failure skips execution.
    pub fn validate(&self, spec: &PipelineSpecification, input: &TabularValue) -> ValidationOutcome {
        let errors = self.check_structure(spec);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "Structural pass rejected specification");
            return ValidationOutcome {
                errors,
                output: None,
            };
        }

        self.classify_execution(spec, input, execute(spec, input))
    }

    /// The structural pass alone.
    pub fn check_structure(&self, spec: &PipelineSpecification) -> Vec<ValidationError> {
        validate_structure(spec)
    }

    /// Classifies an execution result produced elsewhere, e.g. on a blocking
    /// worker under a timeout.
    pub fn classify_execution(
        &self,
        spec: &PipelineSpecification,
        input: &TabularValue,
        result: Result<TabularValue, ExecutionFailure>,
    ) -> ValidationOutcome {
        match result {
            Err(failure) => {
                debug!(
                    operation_index = failure.operation_index,
                    "Execution failed: {}", failure.message
                );
                ValidationOutcome {
                    errors: vec![failure.to_validation_error()],
                    output: None,
                }
            }
            Ok(output) => ValidationOutcome {
                errors: self.check_output(spec, input, &output),
                output: Some(output),
            },
        }
    }

    /// Semantic acceptance checks over a successful output.
    pub fn check_output(
        &self,
        spec: &PipelineSpecification,
        input: &TabularValue,
        output: &TabularValue,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let mut required: Vec<&String> = Vec::new();
        for column in spec.declared_outputs.iter().chain(&self.checks.required_columns) {
            if !required.contains(&column) {
                required.push(column);
            }
        }
        for column in required {
            if !output.has_column(column) {
                errors.push(
                    ValidationError::semantic(format!(
                        "expected output column '{}' is missing (output columns: {})",
                        column,
                        output.headers().join(", ")
                    ))
                    .with_sample(output.rows().iter().cloned()),
                );
            }
        }

        if self.checks.reject_empty_output && output.is_empty() && !input.is_empty() {
            errors.push(ValidationError::semantic(format!(
                "output is empty although the input has {} row(s)",
                input.row_count()
            )));
        }

        if let Some(max) = self.checks.max_output_rows {
            if output.row_count() > max {
                errors.push(ValidationError::semantic(format!(
                    "output has {} rows, above the limit of {}",
                    output.row_count(),
                    max
                )));
            }
        }

        if let Some(ratio) = self.checks.max_row_growth {
            let limit = (input.row_count() as f64 * ratio).ceil();
            if input.row_count() > 0 && output.row_count() as f64 > limit {
                errors.push(ValidationError::semantic(format!(
                    "output has {} rows from {} input rows, above the growth limit of {}x",
                    output.row_count(),
                    input.row_count(),
                    ratio
                )));
            }
        }

        errors
    }
}
