//! Deterministic execution engine.
//!
//! Interprets a pipeline specification against a tabular value, producing a
//! new value or a failure attributed to the operation that raised it.

mod cell;
pub mod executor;
pub mod ops;

pub use executor::{execute, execute_interruptible, replay, ExecutionFailure, ReplayError};
pub use ops::StepFailure;
