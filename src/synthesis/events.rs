//! Progress events emitted while a run is in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::report::{FinalStatus, RunFailureCategory};
use super::run::Phase;
use crate::validation::ValidationError;

/// Events emitted by the orchestrator for progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SynthesisEvent {
    RunStarted {
        run_id: String,
        prompt: String,
        max_iterations: u32,
        timestamp: DateTime<Utc>,
    },
    PhaseChanged {
        run_id: String,
        phase: Phase,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },
    /// A candidate specification arrived from the generator.
    CandidateGenerated {
        run_id: String,
        version: u32,
        operations: usize,
        /// Positions that differ from the previous candidate.
        changed_operations: Vec<usize>,
        timestamp: DateTime<Utc>,
    },
    ValidationFailed {
        run_id: String,
        iteration: u32,
        errors: Vec<ValidationError>,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        run_id: String,
        status: FinalStatus,
        failure: Option<RunFailureCategory>,
        iterations_used: u32,
        timestamp: DateTime<Utc>,
    },
}

impl SynthesisEvent {
    pub fn run_started(run_id: &str, prompt: &str, max_iterations: u32) -> Self {
        Self::RunStarted {
            run_id: run_id.to_string(),
            prompt: prompt.to_string(),
            max_iterations,
            timestamp: Utc::now(),
        }
    }

    pub fn phase_changed(run_id: &str, phase: Phase, iteration: u32) -> Self {
        Self::PhaseChanged {
            run_id: run_id.to_string(),
            phase,
            iteration,
            timestamp: Utc::now(),
        }
    }

    pub fn candidate_generated(
        run_id: &str,
        version: u32,
        operations: usize,
        changed_operations: Vec<usize>,
    ) -> Self {
        Self::CandidateGenerated {
            run_id: run_id.to_string(),
            version,
            operations,
            changed_operations,
            timestamp: Utc::now(),
        }
    }

    pub fn validation_failed(run_id: &str, iteration: u32, errors: Vec<ValidationError>) -> Self {
        Self::ValidationFailed {
            run_id: run_id.to_string(),
            iteration,
            errors,
            timestamp: Utc::now(),
        }
    }

    pub fn run_finished(
        run_id: &str,
        status: FinalStatus,
        failure: Option<RunFailureCategory>,
        iterations_used: u32,
    ) -> Self {
        Self::RunFinished {
            run_id: run_id.to_string(),
            status,
            failure,
            iterations_used,
            timestamp: Utc::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::PhaseChanged { run_id, .. }
            | Self::CandidateGenerated { run_id, .. }
            | Self::ValidationFailed { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }
}

/// Sends an event if anyone is listening.
pub(crate) async fn send_event(
    event_tx: Option<&mpsc::Sender<SynthesisEvent>>,
    event: SynthesisEvent,
) {
    if let Some(tx) = event_tx {
        // Receiver may have been dropped
        let _ = tx.send(event).await;
    }
}
