//! Synthesis orchestrator.
//!
//! Drives one run through generate → validate → execute → evaluate, repairing
//! failed candidates until one is accepted or the iteration budget runs out.
//! Every request ends in a [`SynthesisReport`]; specification problems are
//! never returned as `Err`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};

use super::cancel::CancelHandle;
use super::config::SynthesisConfig;
use super::events::{send_event, SynthesisEvent};
use super::generator::{GenerationRequest, LlmSpecGenerator, SpecGenerator};
use super::report::{RunFailureCategory, SynthesisReport};
use super::run::{Phase, SynthesisRun};
use crate::engine::{execute_interruptible, ExecutionFailure};
use crate::error::{GeneratorError, SynthesisError};
use crate::ledger::{Ledger, RunRecord};
use crate::llm::LlmProvider;
use crate::spec::{diff, PipelineSpecification};
use crate::table::TabularValue;
use crate::validation::{ValidationOutcome, Validator};

// ============================================================================
// Requests
// ============================================================================

/// Per-request overrides of the orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    /// Repair budget for this request. Values below 1 fall back to the
    /// configured budget.
    pub max_iterations: Option<u32>,
}

/// A goal plus the dataset it applies to.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub prompt: String,
    /// Shared read-only for the whole run.
    pub dataset: Arc<TabularValue>,
    /// Caller-supplied reference to where the dataset came from.
    pub dataset_ref: String,
    pub options: SynthesisOptions,
}

impl SynthesisRequest {
    pub fn new(prompt: impl Into<String>, dataset: impl Into<Arc<TabularValue>>) -> Self {
        Self {
            prompt: prompt.into(),
            dataset: dataset.into(),
            dataset_ref: "inline".to_string(),
            options: SynthesisOptions::default(),
        }
    }

    pub fn with_dataset_ref(mut self, dataset_ref: impl Into<String>) -> Self {
        self.dataset_ref = dataset_ref.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.options.max_iterations = Some(max_iterations);
        self
    }
}

// ============================================================================
// Loop outcomes
// ============================================================================

/// How the loop left the evaluating phase for the last time.
enum LoopOutcome {
    Accepted(TabularValue),
    Failed(RunFailureCategory, String),
}

/// Why an awaited call did not produce a result.
enum Interrupted {
    Cancelled,
    Unavailable(String),
}

impl From<Interrupted> for LoopOutcome {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => LoopOutcome::Failed(
                RunFailureCategory::Cancelled,
                "run was cancelled".to_string(),
            ),
            Interrupted::Unavailable(message) => {
                LoopOutcome::Failed(RunFailureCategory::GeneratorUnavailable, message)
            }
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs the bounded synthesis–validate–repair loop.
pub struct SynthesisOrchestrator {
    generator: Arc<dyn SpecGenerator>,
    validator: Validator,
    config: SynthesisConfig,
    ledger: Option<Arc<dyn Ledger>>,
    events: Option<mpsc::Sender<SynthesisEvent>>,
}

impl SynthesisOrchestrator {
    pub fn new(generator: Arc<dyn SpecGenerator>, config: SynthesisConfig) -> Self {
        let validator = Validator::new(config.semantic_checks.clone());
        Self {
            generator,
            validator,
            config,
            ledger: None,
            events: None,
        }
    }

    /// Creates an orchestrator whose generator prompts an LLM.
    pub fn from_llm(provider: Arc<dyn LlmProvider>, config: SynthesisConfig) -> Self {
        let generator = LlmSpecGenerator::new(provider)
            .with_model(config.model.clone())
            .with_temperature(config.temperature);
        Self::new(Arc::new(generator), config)
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<SynthesisEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Synthesizes a specification for one request.
    pub async fn synthesize(
        &self,
        request: SynthesisRequest,
        cancel: &CancelHandle,
    ) -> SynthesisReport {
        let max_iterations = request
            .options
            .max_iterations
            .filter(|max| *max >= 1)
            .unwrap_or(self.config.max_iterations);

        let mut run = SynthesisRun::start(&request.prompt, &request.dataset_ref, max_iterations);
        let span = info_span!("synthesis", run_id = %run.run_id());

        async move {
            info!(
                max_iterations,
                rows = request.dataset.row_count(),
                "Starting synthesis run"
            );
            send_event(
                self.events.as_ref(),
                SynthesisEvent::run_started(run.run_id(), run.prompt(), max_iterations),
            )
            .await;

            let outcome = match self.drive(&mut run, &request, cancel).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Run state machine rejected a transition");
                    LoopOutcome::Failed(RunFailureCategory::GeneratorUnavailable, e.to_string())
                }
            };

            let mut report = match outcome {
                LoopOutcome::Accepted(output) => {
                    run.complete(output.sample(self.config.output_sample_rows))
                }
                LoopOutcome::Failed(category, message) => {
                    warn!(category = %category, "Synthesis failed: {}", message);
                    run.fail(category, message)
                }
            };

            self.record(&mut report).await;

            info!(
                status = %report.final_status,
                iterations_used = report.iterations_used,
                duration_ms = report.duration_ms(),
                "Synthesis run finished"
            );
            send_event(
                self.events.as_ref(),
                SynthesisEvent::run_finished(
                    &report.run_id,
                    report.final_status,
                    report.failure_category(),
                    report.iterations_used,
                ),
            )
            .await;

            report
        }
        .instrument(span)
        .await
    }

    /// Runs independent requests concurrently. Reports come back in request
    /// order.
    pub async fn synthesize_batch(
        &self,
        requests: Vec<SynthesisRequest>,
        cancel: &CancelHandle,
    ) -> Vec<SynthesisReport> {
        join_all(
            requests
                .into_iter()
                .map(|request| self.synthesize(request, cancel)),
        )
        .await
    }

    /// The explicit repair loop. Returns once the run must become terminal.
    async fn drive(
        &self,
        run: &mut SynthesisRun,
        request: &SynthesisRequest,
        cancel: &CancelHandle,
    ) -> Result<LoopOutcome, SynthesisError> {
        let sample = request.dataset.sample(self.config.sample_rows);
        self.enter(run, Phase::Generating).await?;

        loop {
            if cancel.is_cancelled() {
                return Ok(Interrupted::Cancelled.into());
            }

            let generation = GenerationRequest {
                prompt: request.prompt.clone(),
                dataset_sample: sample.clone(),
                dataset_rows: request.dataset.row_count(),
                prior_errors: run.last_errors().to_vec(),
                previous_spec: run.previous_spec().cloned(),
                attempt: run.iteration(),
            };
            let candidate = match self.generate(generation, cancel).await {
                Ok(candidate) => candidate,
                Err(interrupted) => return Ok(interrupted.into()),
            };
            let spec = run.accept_candidate(candidate).clone();
            self.announce_candidate(run, &spec).await;

            self.enter(run, Phase::Validating).await?;
            let structural = self.validator.check_structure(&spec);
            let outcome = if !structural.is_empty() {
                ValidationOutcome {
                    errors: structural,
                    output: None,
                }
            } else {
                self.enter(run, Phase::Executing).await?;
                let result = match self
                    .execute(spec.clone(), Arc::clone(&request.dataset), cancel)
                    .await
                {
                    Ok(result) => result,
                    Err(interrupted) => return Ok(interrupted.into()),
                };
                self.validator
                    .classify_execution(&spec, &request.dataset, result)
            };

            self.enter(run, Phase::Evaluating).await?;
            if outcome.errors.is_empty() {
                if let Some(output) = outcome.output {
                    info!(
                        version = spec.version,
                        rows_out = output.row_count(),
                        "Specification accepted"
                    );
                    return Ok(LoopOutcome::Accepted(output));
                }
            }

            warn!(
                iteration = run.iteration(),
                errors = outcome.errors.len(),
                "Candidate rejected"
            );
            send_event(
                self.events.as_ref(),
                SynthesisEvent::validation_failed(
                    run.run_id(),
                    run.iteration(),
                    outcome.errors.clone(),
                ),
            )
            .await;
            run.record_errors(outcome.errors);

            if !run.can_repair() {
                return Ok(LoopOutcome::Failed(
                    RunFailureCategory::ValidationExhausted,
                    format!(
                        "specification still invalid after {} repair attempt(s)",
                        run.iteration()
                    ),
                ));
            }

            run.begin_repair()?;
            info!(iteration = run.iteration(), "Requesting repair");
            send_event(
                self.events.as_ref(),
                SynthesisEvent::phase_changed(run.run_id(), Phase::Generating, run.iteration()),
            )
            .await;
        }
    }

    async fn enter(&self, run: &mut SynthesisRun, phase: Phase) -> Result<(), SynthesisError> {
        run.transition(phase)?;
        send_event(
            self.events.as_ref(),
            SynthesisEvent::phase_changed(run.run_id(), phase, run.iteration()),
        )
        .await;
        Ok(())
    }

    async fn announce_candidate(&self, run: &SynthesisRun, spec: &PipelineSpecification) {
        let changed = match run.previous_spec() {
            Some(previous) => diff(previous, spec),
            None => (0..spec.operations.len()).collect(),
        };
        info!(
            version = spec.version,
            operations = spec.operations.len(),
            changed = changed.len(),
            "Received candidate specification"
        );
        send_event(
            self.events.as_ref(),
            SynthesisEvent::candidate_generated(
                run.run_id(),
                spec.version,
                spec.operations.len(),
                changed,
            ),
        )
        .await;
    }

    /// Calls the generator under the configured timeout, racing cancellation.
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancelHandle,
    ) -> Result<PipelineSpecification, Interrupted> {
        let limit = self.config.generator_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            result = tokio::time::timeout(limit, self.generator.generate(request)) => match result {
                Ok(Ok(spec)) => Ok(spec),
                Ok(Err(e)) => Err(Interrupted::Unavailable(e.to_string())),
                Err(_) => Err(Interrupted::Unavailable(
                    GeneratorError::Timeout {
                        seconds: limit.as_secs(),
                    }
                    .to_string(),
                )),
            },
        }
    }

    /// Executes a candidate on a blocking worker under the configured timeout.
    ///
    /// On timeout or cancellation the worker is told to stop before its next
    /// operation; its result is discarded.
    async fn execute(
        &self,
        spec: PipelineSpecification,
        dataset: Arc<TabularValue>,
        cancel: &CancelHandle,
    ) -> Result<Result<TabularValue, ExecutionFailure>, Interrupted> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker_cancel = cancel.clone();
        let worker = tokio::task::spawn_blocking(move || {
            execute_interruptible(&spec, &dataset, || {
                worker_stop.load(Ordering::Relaxed) || worker_cancel.is_cancelled()
            })
        });

        let limit = self.config.execution_timeout;
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stop.store(true, Ordering::Relaxed);
                return Err(Interrupted::Cancelled);
            }
            joined = tokio::time::timeout(limit, worker) => joined,
        };

        match joined {
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                Err(Interrupted::Unavailable(format!(
                    "execution did not finish within {}ms",
                    limit.as_millis()
                )))
            }
            Ok(Err(join_error)) => Err(Interrupted::Unavailable(format!(
                "execution worker failed: {}",
                join_error
            ))),
            Ok(Ok(Ok(Some(output)))) => Ok(Ok(output)),
            // Only a cancellation can stop the worker before the timeout.
            Ok(Ok(Ok(None))) => Err(Interrupted::Cancelled),
            Ok(Ok(Err(failure))) => Ok(Err(failure)),
        }
    }

    /// Writes the run to the ledger, noting a failure on the report.
    async fn record(&self, report: &mut SynthesisReport) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let record = RunRecord::from_report(report, self.config.artifact_ttl);
        if let Err(e) = ledger.record(record).await {
            warn!(error = %e, "Failed to record run in ledger");
            report.ledger_error = Some(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Operation;
    use crate::synthesis::FinalStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Generator returning canned specifications in order and recording
    /// every request it saw.
    struct ScriptedGenerator {
        specs: Mutex<Vec<PipelineSpecification>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn new(specs: Vec<PipelineSpecification>) -> Self {
            Self {
                specs: Mutex::new(specs),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SpecGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<PipelineSpecification, GeneratorError> {
            self.requests.lock().expect("lock").push(request);
            let mut specs = self.specs.lock().expect("lock");
            if specs.is_empty() {
                return Err(GeneratorError::Unavailable("script exhausted".to_string()));
            }
            Ok(specs.remove(0))
        }
    }

    fn dataset() -> TabularValue {
        TabularValue::from_records(
            vec!["email".to_string()],
            vec![vec!["A@x.com".to_string()], vec!["b@x.com".to_string()]],
        )
        .expect("valid table")
    }

    fn spec(ops: Vec<Operation>) -> PipelineSpecification {
        PipelineSpecification::new("generator prompt", ops)
    }

    fn lowercase_email() -> Operation {
        Operation::new(
            "normalize-field",
            json!({"field": "email", "op": "lowercase"}),
        )
    }

    #[tokio::test]
    async fn test_first_candidate_accepted() {
        let generator = Arc::new(ScriptedGenerator::new(vec![spec(vec![lowercase_email()])]));
        let orchestrator = SynthesisOrchestrator::new(generator.clone(), SynthesisConfig::default());

        let report = orchestrator
            .synthesize(
                SynthesisRequest::new("lowercase emails", dataset()),
                &CancelHandle::new(),
            )
            .await;

        assert_eq!(report.final_status, FinalStatus::Success);
        assert_eq!(report.iterations_used, 0);
        let accepted = report.specification.expect("spec");
        assert_eq!(accepted.version, 1);
        assert_eq!(accepted.created_from_prompt, "lowercase emails");
        let output = report.output_sample.expect("output");
        assert_eq!(output.rows()[0]["email"], json!("a@x.com"));
        assert_eq!(generator.requests.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_structural_failure_skips_execution_then_repairs() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            spec(Vec::new()),
            spec(vec![lowercase_email()]),
        ]));
        let orchestrator = SynthesisOrchestrator::new(generator.clone(), SynthesisConfig::default());

        let report = orchestrator
            .synthesize(
                SynthesisRequest::new("lowercase emails", dataset()),
                &CancelHandle::new(),
            )
            .await;

        assert!(report.is_success());
        assert_eq!(report.iterations_used, 1);
        assert_eq!(report.specification.as_ref().map(|s| s.version), Some(2));

        let trace: Vec<(Phase, u32)> = report.phases.iter().map(|p| (p.phase, p.iteration)).collect();
        assert_eq!(
            trace,
            vec![
                (Phase::Analyzing, 0),
                (Phase::Generating, 0),
                (Phase::Validating, 0),
                (Phase::Evaluating, 0),
                (Phase::Generating, 1),
                (Phase::Validating, 1),
                (Phase::Executing, 1),
                (Phase::Evaluating, 1),
                (Phase::Complete, 1),
            ]
        );

        let requests = generator.requests.lock().expect("lock");
        assert_eq!(requests[1].attempt, 1);
        assert_eq!(requests[1].prior_errors.len(), 1);
        assert!(requests[1].previous_spec.is_some());
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let generator = Arc::new(ScriptedGenerator::new(vec![spec(vec![lowercase_email()])]));
        let (tx, mut rx) = mpsc::channel(64);
        let orchestrator =
            SynthesisOrchestrator::new(generator, SynthesisConfig::default()).with_events(tx);

        let report = orchestrator
            .synthesize(
                SynthesisRequest::new("lowercase emails", dataset()),
                &CancelHandle::new(),
            )
            .await;
        drop(orchestrator);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(SynthesisEvent::RunStarted { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            SynthesisEvent::CandidateGenerated { version: 1, operations: 1, .. }
        )));
        assert!(matches!(
            events.last(),
            Some(SynthesisEvent::RunFinished { status: FinalStatus::Success, .. })
        ));
        assert!(events.iter().all(|e| e.run_id() == report.run_id));
    }

    #[tokio::test]
    async fn test_request_max_iterations_overrides_config() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            spec(Vec::new()),
            spec(Vec::new()),
        ]));
        let orchestrator = SynthesisOrchestrator::new(generator.clone(), SynthesisConfig::default());

        let report = orchestrator
            .synthesize(
                SynthesisRequest::new("goal", dataset()).with_max_iterations(1),
                &CancelHandle::new(),
            )
            .await;

        assert_eq!(
            report.failure_category(),
            Some(RunFailureCategory::ValidationExhausted)
        );
        assert_eq!(report.iterations_used, 1);
        assert_eq!(generator.requests.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_never_calls_generator() {
        let generator = Arc::new(ScriptedGenerator::new(vec![spec(vec![lowercase_email()])]));
        let orchestrator = SynthesisOrchestrator::new(generator.clone(), SynthesisConfig::default());
        let cancel = CancelHandle::new();
        cancel.cancel();

        let report = orchestrator
            .synthesize(SynthesisRequest::new("goal", dataset()), &cancel)
            .await;

        assert_eq!(report.failure_category(), Some(RunFailureCategory::Cancelled));
        assert!(report.specification.is_none());
        assert!(generator.requests.lock().expect("lock").is_empty());
    }
}
