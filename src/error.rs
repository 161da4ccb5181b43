//! Error types for pipeforge operations.
//!
//! Defines error types for the major subsystems:
//! - Tabular value construction and inspection
//! - Pipeline specification loading and saving
//! - LLM API interactions
//! - Specification generation (the external generator seam)
//! - Run ledger persistence
//! - Synthesis run state transitions
//!
//! Validation findings are not errors in this sense: they are data
//! (`validation::ValidationError`) fed back into the repair loop.

use thiserror::Error;

/// Errors that can occur while building or inspecting a tabular value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Row {row} does not match headers: {reason}")]
    Shape { row: usize, reason: String },

    #[error("Duplicate header '{0}'")]
    DuplicateHeader(String),

    #[error("Column '{0}' not found")]
    UnknownColumn(String),

    #[error("CSV error: {0}")]
    Csv(String),
}

impl From<csv::Error> for TableError {
    fn from(err: csv::Error) -> Self {
        TableError::Csv(err.to_string())
    }
}

/// Errors that can occur while loading or saving pipeline specifications.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Failed to parse pipeline specification: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors raised by a specification generator.
///
/// Every variant is an infrastructure failure: the orchestrator treats them
/// all as `generator-unavailable` and never retries them.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Generator timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Malformed generator response: {0}")]
    MalformedResponse(String),
}

impl From<LlmError> for GeneratorError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ParseError(msg) => GeneratorError::MalformedResponse(msg),
            other => GeneratorError::Unavailable(other.to_string()),
        }
    }
}

/// Errors that can occur while persisting run records.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Run '{0}' has already been recorded")]
    DuplicateRun(String),

    #[error("Run '{0}' not found in ledger")]
    NotFound(String),

    #[error("Failed to create ledger directory: {0}")]
    DirectoryCreationFailed(String),

    #[error("Invalid ledger record: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the synthesis run state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("Invalid phase transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },
}
