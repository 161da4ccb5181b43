//! The synthesis run state machine.
//!
//! A run moves through fixed phases. Every transition is checked by
//! [`Phase::can_transition_to`], and a run reaches a terminal phase only by
//! being consumed into a [`SynthesisReport`], so a finished run cannot be
//! touched again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::report::{FinalStatus, RunFailure, RunFailureCategory, SynthesisReport};
use crate::error::SynthesisError;
use crate::spec::PipelineSpecification;
use crate::table::TabularValue;
use crate::validation::ValidationError;

// ============================================================================
// Phases
// ============================================================================

/// Phase of a synthesis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Analyzing,
    Generating,
    Validating,
    Executing,
    Evaluating,
    Complete,
    Failed,
}

impl Phase {
    /// Whether the run may move from `self` to `next`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match self {
            Analyzing => matches!(next, Generating | Failed),
            Generating => matches!(next, Validating | Failed),
            // Structural rejection goes straight to evaluation.
            Validating => matches!(next, Executing | Evaluating | Failed),
            Executing => matches!(next, Evaluating | Failed),
            Evaluating => matches!(next, Complete | Generating | Failed),
            Complete | Failed => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Analyzing => "analyzing",
            Phase::Generating => "generating",
            Phase::Validating => "validating",
            Phase::Executing => "executing",
            Phase::Evaluating => "evaluating",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the phase trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub iteration: u32,
    pub at: DateTime<Utc>,
}

// ============================================================================
// Run
// ============================================================================

/// In-flight state of one synthesis attempt.
///
/// `iteration` counts repairs: 0 while the first candidate is evaluated, and
/// never above `max_iterations`.
#[derive(Debug)]
pub struct SynthesisRun {
    run_id: String,
    prompt: String,
    input_dataset_ref: String,
    max_iterations: u32,
    iteration: u32,
    phase: Phase,
    current_spec: Option<PipelineSpecification>,
    previous_spec: Option<PipelineSpecification>,
    last_errors: Vec<ValidationError>,
    phases: Vec<PhaseRecord>,
    started_at: DateTime<Utc>,
}

impl SynthesisRun {
    /// Starts a run in the `analyzing` phase.
    pub fn start(
        prompt: impl Into<String>,
        input_dataset_ref: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            input_dataset_ref: input_dataset_ref.into(),
            max_iterations,
            iteration: 0,
            phase: Phase::Analyzing,
            current_spec: None,
            previous_spec: None,
            last_errors: Vec::new(),
            phases: vec![PhaseRecord {
                phase: Phase::Analyzing,
                iteration: 0,
                at: started_at,
            }],
            started_at,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn input_dataset_ref(&self) -> &str {
        &self.input_dataset_ref
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_spec(&self) -> Option<&PipelineSpecification> {
        self.current_spec.as_ref()
    }

    pub fn previous_spec(&self) -> Option<&PipelineSpecification> {
        self.previous_spec.as_ref()
    }

    pub fn last_errors(&self) -> &[ValidationError] {
        &self.last_errors
    }

    pub fn phases(&self) -> &[PhaseRecord] {
        &self.phases
    }

    /// Whether another repair fits in the iteration budget.
    pub fn can_repair(&self) -> bool {
        self.iteration < self.max_iterations
    }

    /// Moves to a non-terminal phase.
    ///
    /// Terminal phases are reached only through [`complete`](Self::complete)
    /// and [`fail`](Self::fail).
    pub(crate) fn transition(&mut self, next: Phase) -> Result<(), SynthesisError> {
        if next.is_terminal() || !self.phase.can_transition_to(next) {
            return Err(SynthesisError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(run_id = %self.run_id, from = %self.phase, to = %next, "Phase transition");
        self.enter(next);
        Ok(())
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.phases.push(PhaseRecord {
            phase,
            iteration: self.iteration,
            at: Utc::now(),
        });
    }

    /// Installs a freshly generated candidate.
    ///
    /// The first candidate is stamped with the run's prompt; every later one
    /// is a [`revised`](PipelineSpecification::revised) version of the
    /// candidate it repairs, so the id carries over and versions count up.
    pub(crate) fn accept_candidate(
        &mut self,
        mut spec: PipelineSpecification,
    ) -> &PipelineSpecification {
        let spec = match &self.previous_spec {
            Some(previous) => previous.revised(spec.operations, spec.declared_outputs),
            None => {
                spec.version = 1;
                spec.created_from_prompt = self.prompt.clone();
                spec
            }
        };
        self.current_spec.insert(spec)
    }

    pub(crate) fn record_errors(&mut self, errors: Vec<ValidationError>) {
        self.last_errors = errors;
    }

    /// Starts a repair: the current candidate becomes the previous one. It
    /// stays current until the repaired candidate replaces it, so a failed
    /// repair still reports it.
    pub(crate) fn begin_repair(&mut self) -> Result<(), SynthesisError> {
        if !self.can_repair() {
            return Err(SynthesisError::InvalidTransition {
                from: self.phase.to_string(),
                to: Phase::Generating.to_string(),
            });
        }
        self.iteration += 1;
        self.previous_spec = self.current_spec.clone();
        self.transition(Phase::Generating)
    }

    /// Finishes the run successfully.
    pub(crate) fn complete(mut self, output_sample: TabularValue) -> SynthesisReport {
        self.enter(Phase::Complete);
        self.last_errors.clear();
        self.into_report(FinalStatus::Success, Some(output_sample), None)
    }

    /// Finishes the run with a failure. The last validation errors are kept.
    pub(crate) fn fail(
        mut self,
        category: RunFailureCategory,
        message: impl Into<String>,
    ) -> SynthesisReport {
        self.enter(Phase::Failed);
        let failure = RunFailure {
            category,
            message: message.into(),
        };
        self.into_report(FinalStatus::Failed, None, Some(failure))
    }

    fn into_report(
        self,
        final_status: FinalStatus,
        output_sample: Option<TabularValue>,
        failure: Option<RunFailure>,
    ) -> SynthesisReport {
        SynthesisReport {
            run_id: self.run_id,
            prompt: self.prompt,
            input_dataset_ref: self.input_dataset_ref,
            final_status,
            iterations_used: self.iteration,
            specification: self.current_spec,
            validation_errors: self.last_errors,
            output_sample,
            failure,
            phases: self.phases,
            ledger_error: None,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Operation;
    use serde_json::json;

    fn candidate() -> PipelineSpecification {
        PipelineSpecification::new(
            "ignored",
            vec![Operation::new("select-columns", json!({"columns": ["email"]}))],
        )
    }

    fn walk_to_evaluating(run: &mut SynthesisRun) {
        run.transition(Phase::Generating).expect("generating");
        run.accept_candidate(candidate());
        run.transition(Phase::Validating).expect("validating");
        run.transition(Phase::Evaluating).expect("evaluating");
    }

    #[test]
    fn test_transition_table() {
        assert!(Phase::Analyzing.can_transition_to(Phase::Generating));
        assert!(!Phase::Analyzing.can_transition_to(Phase::Validating));
        assert!(Phase::Validating.can_transition_to(Phase::Evaluating));
        assert!(Phase::Evaluating.can_transition_to(Phase::Generating));
        assert!(!Phase::Executing.can_transition_to(Phase::Generating));
        for next in [Phase::Analyzing, Phase::Generating, Phase::Failed] {
            assert!(!Phase::Complete.can_transition_to(next));
            assert!(!Phase::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut run = SynthesisRun::start("goal", "data.csv", 3);
        let err = run.transition(Phase::Executing).unwrap_err();
        assert_eq!(
            err,
            SynthesisError::InvalidTransition {
                from: "analyzing".to_string(),
                to: "executing".to_string(),
            }
        );
        assert!(run.transition(Phase::Complete).is_err());
        assert_eq!(run.phase(), Phase::Analyzing);
    }

    #[test]
    fn test_repair_bookkeeping() {
        let mut run = SynthesisRun::start("goal", "data.csv", 1);
        walk_to_evaluating(&mut run);
        let first_id = run.current_spec().expect("spec").id.clone();
        run.record_errors(vec![ValidationError::semantic("output is empty")]);

        run.begin_repair().expect("repair");
        assert_eq!(run.iteration(), 1);
        assert_eq!(run.previous_spec().expect("previous").version, 1);
        assert_eq!(run.current_spec().expect("still current").id, first_id);

        run.accept_candidate(candidate());
        let spec = run.current_spec().expect("spec");
        assert_eq!(spec.id, first_id);
        assert_eq!(spec.version, 2);
        assert_eq!(spec.created_from_prompt, "goal");

        run.transition(Phase::Validating).expect("validating");
        run.transition(Phase::Evaluating).expect("evaluating");
        assert!(!run.can_repair());
        assert!(run.begin_repair().is_err());
    }

    #[test]
    fn test_failed_report_keeps_last_errors() {
        let mut run = SynthesisRun::start("goal", "data.csv", 0);
        walk_to_evaluating(&mut run);
        run.record_errors(vec![ValidationError::runtime(0, "column 'phone' not found")]);

        let report = run.fail(RunFailureCategory::ValidationExhausted, "out of repairs");
        assert_eq!(report.final_status, FinalStatus::Failed);
        assert_eq!(report.iterations_used, 0);
        assert_eq!(report.validation_errors.len(), 1);
        assert!(report.output_sample.is_none());
        assert_eq!(
            report.failure.as_ref().map(|f| f.category),
            Some(RunFailureCategory::ValidationExhausted)
        );
        let trace: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(
            trace,
            vec![
                Phase::Analyzing,
                Phase::Generating,
                Phase::Validating,
                Phase::Evaluating,
                Phase::Failed
            ]
        );
    }

    #[test]
    fn test_failed_repair_reports_last_candidate() {
        let mut run = SynthesisRun::start("goal", "data.csv", 2);
        walk_to_evaluating(&mut run);
        run.record_errors(vec![ValidationError::runtime(0, "column 'phone' not found")]);
        run.begin_repair().expect("repair");

        let report = run.fail(RunFailureCategory::GeneratorUnavailable, "503");
        let spec = report.specification.expect("last candidate kept");
        assert_eq!(spec.version, 1);
        assert_eq!(spec.created_from_prompt, "goal");
        assert_eq!(report.validation_errors.len(), 1);
        assert_eq!(report.iterations_used, 1);
    }

    #[test]
    fn test_completed_report() {
        let mut run = SynthesisRun::start("goal", "data.csv", 3);
        walk_to_evaluating(&mut run);
        let sample = TabularValue::empty(vec!["email".to_string()]).expect("table");

        let report = run.complete(sample);
        assert_eq!(report.final_status, FinalStatus::Success);
        assert!(report.failure.is_none());
        assert!(report.validation_errors.is_empty());
        assert_eq!(report.phases.last().map(|p| p.phase), Some(Phase::Complete));
    }
}
