//! Final result of a synthesis run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::PhaseRecord;
use crate::spec::PipelineSpecification;
use crate::table::TabularValue;
use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Success,
    Failed,
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalStatus::Success => write!(f, "success"),
            FinalStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a run ended without an accepted specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunFailureCategory {
    /// Every allowed repair was used and the last candidate still failed.
    ValidationExhausted,
    /// The generator or the execution sandbox failed; never retried.
    GeneratorUnavailable,
    Cancelled,
}

impl std::fmt::Display for RunFailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunFailureCategory::ValidationExhausted => write!(f, "validation-exhausted"),
            RunFailureCategory::GeneratorUnavailable => write!(f, "generator-unavailable"),
            RunFailureCategory::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub category: RunFailureCategory,
    pub message: String,
}

/// Structured outcome of one synthesis request.
///
/// Bad specifications never surface as `Err`; they end up here as a failed
/// status with the last validation errors attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub run_id: String,
    pub prompt: String,
    pub input_dataset_ref: String,
    pub final_status: FinalStatus,
    /// Number of repairs performed after the first generation.
    pub iterations_used: u32,
    /// The accepted specification on success, the last candidate otherwise.
    pub specification: Option<PipelineSpecification>,
    pub validation_errors: Vec<ValidationError>,
    pub output_sample: Option<TabularValue>,
    pub failure: Option<RunFailure>,
    pub phases: Vec<PhaseRecord>,
    /// Set when the run could not be written to the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SynthesisReport {
    pub fn is_success(&self) -> bool {
        self.final_status == FinalStatus::Success
    }

    pub fn failure_category(&self) -> Option<RunFailureCategory> {
        self.failure.as_ref().map(|f| f.category)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
