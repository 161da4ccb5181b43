//! Synthesis–validate–repair orchestration.
//!
//! The orchestrator asks a [`SpecGenerator`] for a candidate specification,
//! validates and executes it, and feeds any errors back to the generator for
//! a bounded number of repairs.
//!
//! ```ignore
//! use std::sync::Arc;
//! use pipeforge::synthesis::{CancelHandle, SynthesisConfig, SynthesisOrchestrator, SynthesisRequest};
//!
//! let orchestrator = SynthesisOrchestrator::from_llm(Arc::new(client), SynthesisConfig::from_env()?);
//! let report = orchestrator
//!     .synthesize(SynthesisRequest::new("normalize emails", dataset), &CancelHandle::new())
//!     .await;
//! ```

pub mod cancel;
pub mod config;
pub mod events;
pub mod generator;
pub mod orchestrator;
pub mod prompts;
pub mod report;
pub mod run;

pub use cancel::CancelHandle;
pub use config::{ConfigError, SynthesisConfig};
pub use events::SynthesisEvent;
pub use generator::{parse_specification, GenerationRequest, LlmSpecGenerator, SpecGenerator};
pub use orchestrator::{SynthesisOptions, SynthesisOrchestrator, SynthesisRequest};
pub use report::{FinalStatus, RunFailure, RunFailureCategory, SynthesisReport};
pub use run::{Phase, PhaseRecord, SynthesisRun};
