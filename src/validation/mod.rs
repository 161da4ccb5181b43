//! Specification validation.
//!
//! The structural pass checks a specification against the per-kind parameter
//! schemas without touching data. The semantic pass executes it and checks
//! the outcome against configurable acceptance rules. Findings from either
//! pass are normalized into `ValidationError` values.

pub mod error;
pub mod validator;

pub use error::{ErrorCategory, ValidationError, MAX_SAMPLE_ROWS};
pub use validator::{SemanticChecks, ValidationOutcome, Validator};
