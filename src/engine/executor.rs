//! Pipeline execution.
//!
//! Applies a specification's operations strictly left to right, halting at the
//! first operation that fails.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use super::ops::{apply, StepFailure};
use crate::spec::{validate_structure, PipelineSpecification, Step};
use crate::table::{Row, TabularValue};
use crate::validation::{ValidationError, MAX_SAMPLE_ROWS};

/// A runtime failure attributed to one operation.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("operation {operation_index} failed: {message}")]
pub struct ExecutionFailure {
    pub operation_index: usize,
    pub message: String,
    pub sample: Vec<Row>,
}

impl ExecutionFailure {
    fn at(operation_index: usize, failure: StepFailure) -> Self {
        Self {
            operation_index,
            message: failure.message,
            sample: failure.sample,
        }
    }

    /// Converts the failure into a runtime validation error.
    pub fn to_validation_error(&self) -> ValidationError {
        ValidationError::runtime(self.operation_index, self.message.clone())
            .with_sample(self.sample.iter().take(MAX_SAMPLE_ROWS).cloned())
    }
}

/// How far an operation run got.
enum Progress {
    Finished(TabularValue),
    Stopped,
}

/// Executes a specification against an input value.
///
/// The output is a pure function of `spec.operations` and `input`.
pub fn execute(
    spec: &PipelineSpecification,
    input: &TabularValue,
) -> Result<TabularValue, ExecutionFailure> {
    match run_operations(spec, input, || false)? {
        Progress::Finished(output) => Ok(output),
        // Unreachable with a predicate that never fires.
        Progress::Stopped => Ok(input.clone()),
    }
}

/// Executes a specification, checking `should_stop` before each operation.
///
/// Returns `Ok(None)` if execution stopped early.
pub fn execute_interruptible(
    spec: &PipelineSpecification,
    input: &TabularValue,
    should_stop: impl Fn() -> bool,
) -> Result<Option<TabularValue>, ExecutionFailure> {
    Ok(match run_operations(spec, input, should_stop)? {
        Progress::Finished(output) => Some(output),
        Progress::Stopped => None,
    })
}

fn run_operations(
    spec: &PipelineSpecification,
    input: &TabularValue,
    should_stop: impl Fn() -> bool,
) -> Result<Progress, ExecutionFailure> {
    let mut current = input.clone();

    for (idx, op) in spec.operations.iter().enumerate() {
        if should_stop() {
            debug!(operation_index = idx, "Execution stopped before operation");
            return Ok(Progress::Stopped);
        }

        // Specifications reaching the engine normally passed the structural
        // gate already; a decode failure here is reported like any other.
        let step = Step::decode(op).map_err(|message| ExecutionFailure {
            operation_index: idx,
            message,
            sample: Vec::new(),
        })?;

        let rows_in = current.row_count();
        current = apply(&step, current).map_err(|f| ExecutionFailure::at(idx, f))?;
        trace!(
            operation_index = idx,
            kind = %op.kind,
            rows_in,
            rows_out = current.row_count(),
            "Applied operation"
        );
    }

    Ok(Progress::Finished(current))
}

/// Re-runs an accepted specification against a dataset without synthesis.
///
/// The structural gate runs first; a structurally invalid specification is
/// never executed.
pub fn replay(
    spec: &PipelineSpecification,
    dataset: &TabularValue,
) -> Result<TabularValue, ReplayError> {
    let errors = validate_structure(spec);
    if !errors.is_empty() {
        return Err(ReplayError::Structural(errors));
    }
    Ok(execute(spec, dataset)?)
}

/// Failure of a replay request.
#[derive(Debug, Clone, Error)]
pub enum ReplayError {
    #[error("specification is structurally invalid ({} error(s))", .0.len())]
    Structural(Vec<ValidationError>),

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
}
