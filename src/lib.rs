//! pipeforge: synthesize, validate and repair deterministic tabular pipelines.
//!
//! A natural-language goal and a sample dataset go in; a versioned,
//! re-runnable pipeline specification comes out. Candidates come from an
//! external generator (an LLM), are checked structurally and by executing them
//! on the real data, and are repaired from the resulting errors within a
//! bounded number of attempts.

pub mod cli;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod spec;
pub mod synthesis;
pub mod table;
pub mod utils;
pub mod validation;

pub use engine::{execute, replay, ExecutionFailure};
pub use error::{GeneratorError, LedgerError, LlmError, SpecError, SynthesisError, TableError};
pub use ledger::{FileLedger, Ledger, MemoryLedger, RunRecord};
pub use spec::{Operation, OperationKind, PipelineSpecification};
pub use synthesis::{
    CancelHandle, FinalStatus, RunFailureCategory, SpecGenerator, SynthesisConfig,
    SynthesisOrchestrator, SynthesisReport, SynthesisRequest,
};
pub use table::{Row, TabularValue};
pub use validation::{ErrorCategory, ValidationError, Validator};
