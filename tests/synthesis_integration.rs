//! End-to-end tests of the synthesis loop with scripted generators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use pipeforge::error::{GeneratorError, LedgerError, LlmError};
use pipeforge::ledger::{Ledger, MemoryLedger, RunRecord};
use pipeforge::llm::{Choice, CompletionRequest, CompletionResponse, LlmProvider, Message, Usage};
use pipeforge::synthesis::{
    CancelHandle, FinalStatus, GenerationRequest, Phase, RunFailureCategory, SpecGenerator,
    SynthesisConfig, SynthesisEvent, SynthesisOrchestrator, SynthesisRequest,
};
use pipeforge::table::from_csv_str;
use pipeforge::validation::ErrorCategory;
use pipeforge::{replay, Operation, PipelineSpecification, TabularValue};

// ============================================================================
// Test doubles
// ============================================================================

/// LLM provider replaying canned replies and keeping every request.
struct MockLlmProvider {
    responses: Mutex<Vec<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockLlmProvider {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn user_message(&self, call: usize) -> String {
        let requests = self.requests.lock().expect("lock");
        requests[call].messages[1].content.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock").push(request);
        let content = self
            .responses
            .lock()
            .expect("lock")
            .get(idx)
            .cloned()
            .ok_or_else(|| LlmError::ApiError {
                code: 503,
                message: "backend unavailable".to_string(),
            })?;

        Ok(CompletionResponse {
            id: format!("mock-{}", idx),
            model: "mock".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::default(),
        })
    }
}

/// Generator that never answers in time.
struct StalledGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl SpecGenerator for StalledGenerator {
    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<PipelineSpecification, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(GeneratorError::Unavailable("unreachable".to_string()))
    }
}

/// Generator that answers every request with the same specification.
struct FixedGenerator {
    spec: PipelineSpecification,
}

#[async_trait]
impl SpecGenerator for FixedGenerator {
    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<PipelineSpecification, GeneratorError> {
        Ok(self.spec.clone())
    }
}

/// Ledger whose writes always fail.
struct BrokenLedger;

#[async_trait]
impl Ledger for BrokenLedger {
    async fn record(&self, _record: RunRecord) -> Result<(), LedgerError> {
        Err(LedgerError::DirectoryCreationFailed("disk full".to_string()))
    }

    async fn load(&self, run_id: &str) -> Result<RunRecord, LedgerError> {
        Err(LedgerError::NotFound(run_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<RunRecord>, LedgerError> {
        Ok(Vec::new())
    }

    async fn purge_expired(
        &self,
        _now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<String>, LedgerError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn customers() -> TabularValue {
    from_csv_str("email,name\n A@X.com ,Ann\na@x.com,Ann B\nb@y.org,Bob\n").expect("valid csv")
}

fn email_reply() -> String {
    r#"Here is the pipeline:
```json
{
  "operations": [
    {"kind": "normalize-field", "field": "email", "op": "trim"},
    {"kind": "normalize-field", "field": "email", "op": "lowercase"},
    {"kind": "deduplicate", "key": "email", "keep": "first"}
  ],
  "declared_outputs": ["email", "name"]
}
```"#
        .to_string()
}

fn phone_reply() -> String {
    r#"{"operations": [{"kind": "normalize-field", "field": "phone", "op": "digits-only"}]}"#
        .to_string()
}

/// A dataset and pipeline that keep the execution worker busy for a while.
fn heavy_workload() -> (TabularValue, PipelineSpecification) {
    let dataset = TabularValue::from_records(
        vec!["email".to_string(), "name".to_string()],
        (0..100_000).map(|i| vec![format!(" User{}@Example.com ", i), format!("user {}", i)]),
    )
    .expect("valid table");
    let operations = (0..60)
        .map(|i| {
            let op = if i % 2 == 0 { "uppercase" } else { "lowercase" };
            Operation::new("normalize-field", json!({"field": "email", "op": op}))
        })
        .collect();
    (dataset, PipelineSpecification::new("normalize emails", operations))
}

fn orchestrator(provider: Arc<MockLlmProvider>, config: SynthesisConfig) -> SynthesisOrchestrator {
    SynthesisOrchestrator::from_llm(provider, config)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_email_normalize_and_dedupe() {
    let provider = Arc::new(MockLlmProvider::new(vec![email_reply()]));
    let ledger = Arc::new(MemoryLedger::new());
    let orchestrator = orchestrator(provider.clone(), SynthesisConfig::default())
        .with_ledger(ledger.clone());

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("normalize emails and remove duplicates", customers())
                .with_dataset_ref("customers.csv"),
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(report.final_status, FinalStatus::Success);
    assert_eq!(report.iterations_used, 0);
    assert!(report.validation_errors.is_empty());
    assert_eq!(provider.calls(), 1);

    let output = report.output_sample.as_ref().expect("output");
    let emails: Vec<_> = output.rows().iter().map(|r| r["email"].clone()).collect();
    assert_eq!(emails, vec![json!("a@x.com"), json!("b@y.org")]);
    assert_eq!(output.rows()[0]["name"], json!("Ann"));

    let record = ledger.load(&report.run_id).await.expect("recorded");
    assert_eq!(record.status, FinalStatus::Success);
    assert_eq!(record.input_dataset_ref, "customers.csv");
    assert_eq!(
        record.spec_fingerprint,
        report.specification.as_ref().map(|s| s.fingerprint())
    );
    assert_eq!(ledger.len().await, 1);
}

#[tokio::test]
async fn test_missing_column_is_repaired() {
    let provider = Arc::new(MockLlmProvider::new(vec![phone_reply(), email_reply()]));
    let orchestrator = orchestrator(provider.clone(), SynthesisConfig::default());

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("clean phone numbers", customers()),
            &CancelHandle::new(),
        )
        .await;

    assert!(report.is_success());
    assert_eq!(report.iterations_used, 1);
    assert_eq!(provider.calls(), 2);

    // The repair prompt carries the runtime error attributed to operation 0.
    let repair = provider.user_message(1);
    assert!(repair.contains("column 'phone' not found"));
    assert!(repair.contains("operation 0"));

    let spec = report.specification.expect("spec");
    assert_eq!(spec.version, 2);
    assert_eq!(spec.created_from_prompt, "clean phone numbers");
}

#[tokio::test]
async fn test_iteration_budget_is_exhausted() {
    let provider = Arc::new(MockLlmProvider::new(vec![phone_reply(); 5]));
    let ledger = Arc::new(MemoryLedger::new());
    let orchestrator = orchestrator(provider.clone(), SynthesisConfig::default())
        .with_ledger(ledger.clone());

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("clean phone numbers", customers()).with_max_iterations(2),
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(report.final_status, FinalStatus::Failed);
    assert_eq!(
        report.failure_category(),
        Some(RunFailureCategory::ValidationExhausted)
    );
    assert_eq!(report.iterations_used, 2);
    assert_eq!(provider.calls(), 3);
    assert!(report.output_sample.is_none());

    assert_eq!(report.validation_errors.len(), 1);
    let error = &report.validation_errors[0];
    assert_eq!(error.category, ErrorCategory::Runtime);
    assert_eq!(error.operation_index, Some(0));
    assert!(error.sample_context.is_some());

    // The last candidate stays on the report for inspection.
    assert_eq!(report.specification.as_ref().map(|s| s.version), Some(3));

    let record = ledger.load(&report.run_id).await.expect("recorded");
    assert_eq!(record.failure_category, Some(RunFailureCategory::ValidationExhausted));
    assert_eq!(ledger.len().await, 1);
}

#[tokio::test]
async fn test_generator_failure_is_not_retried() {
    let provider = Arc::new(MockLlmProvider::new(Vec::new()));
    let orchestrator = orchestrator(provider.clone(), SynthesisConfig::default());

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("anything", customers()),
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(
        report.failure_category(),
        Some(RunFailureCategory::GeneratorUnavailable)
    );
    assert!(report.failure.as_ref().expect("failure").message.contains("503"));
    assert_eq!(provider.calls(), 1);
    assert_eq!(report.iterations_used, 0);
    assert!(report.specification.is_none());
}

#[tokio::test]
async fn test_malformed_reply_is_generator_unavailable() {
    let provider = Arc::new(MockLlmProvider::new(vec![
        "I cannot help with that.".to_string(),
        email_reply(),
    ]));
    let orchestrator = orchestrator(provider.clone(), SynthesisConfig::default());

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("anything", customers()),
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(
        report.failure_category(),
        Some(RunFailureCategory::GeneratorUnavailable)
    );
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_generator_timeout_is_not_retried() {
    let generator = Arc::new(StalledGenerator {
        calls: AtomicUsize::new(0),
    });
    let config = SynthesisConfig::default().with_generator_timeout(Duration::from_millis(50));
    let orchestrator = SynthesisOrchestrator::new(generator.clone(), config);

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("anything", customers()),
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(
        report.failure_category(),
        Some(RunFailureCategory::GeneratorUnavailable)
    );
    assert!(report
        .failure
        .as_ref()
        .expect("failure")
        .message
        .contains("timed out"));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_call() {
    let generator = Arc::new(StalledGenerator {
        calls: AtomicUsize::new(0),
    });
    let orchestrator = SynthesisOrchestrator::new(generator, SynthesisConfig::default());
    let cancel = CancelHandle::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.synthesize(SynthesisRequest::new("anything", customers()), &cancel),
    )
    .await
    .expect("cancellation ends the run promptly");

    assert_eq!(report.failure_category(), Some(RunFailureCategory::Cancelled));
    assert_eq!(report.phases.last().map(|p| p.phase), Some(Phase::Failed));
}

#[tokio::test]
async fn test_accepted_specification_replays_identically() {
    let provider = Arc::new(MockLlmProvider::new(vec![email_reply()]));
    let orchestrator = orchestrator(provider, SynthesisConfig::default());
    let dataset = customers();

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("normalize emails", dataset.clone()),
            &CancelHandle::new(),
        )
        .await;
    let spec = report.specification.expect("spec");

    // Round-trip through the wire format before replaying.
    let reloaded = PipelineSpecification::from_json(&spec.to_json().expect("json")).expect("parse");
    let first = replay(&reloaded, &dataset).expect("replay");
    let second = replay(&reloaded, &dataset).expect("replay");

    assert_eq!(first, second);
    assert_eq!(Some(first), report.output_sample);
}

#[tokio::test]
async fn test_ledger_failure_does_not_fail_the_run() {
    let provider = Arc::new(MockLlmProvider::new(vec![email_reply()]));
    let orchestrator =
        orchestrator(provider, SynthesisConfig::default()).with_ledger(Arc::new(BrokenLedger));

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("normalize emails", customers()),
            &CancelHandle::new(),
        )
        .await;

    assert!(report.is_success());
    assert!(report.ledger_error.as_deref().unwrap_or("").contains("disk full"));
}

#[tokio::test]
async fn test_semantic_checks_drive_repair() {
    let drop_everything = r#"{"operations": [{"kind": "filter", "field": "email", "op": "eq", "value": "nobody"}]}"#;
    let provider = Arc::new(MockLlmProvider::new(vec![
        drop_everything.to_string(),
        email_reply(),
    ]));
    let orchestrator = orchestrator(provider.clone(), SynthesisConfig::default());

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("normalize emails", customers()),
            &CancelHandle::new(),
        )
        .await;

    assert!(report.is_success());
    assert_eq!(report.iterations_used, 1);
    assert!(provider.user_message(1).contains("output is empty"));
}

#[tokio::test]
async fn test_batch_runs_are_independent() {
    let provider = Arc::new(MockLlmProvider::new(vec![email_reply(), email_reply()]));
    let ledger = Arc::new(MemoryLedger::new());
    let orchestrator = orchestrator(provider, SynthesisConfig::default()).with_ledger(ledger.clone());

    let reports = orchestrator
        .synthesize_batch(
            vec![
                SynthesisRequest::new("first", customers()),
                SynthesisRequest::new("second", customers()),
            ],
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].prompt, "first");
    assert_eq!(reports[1].prompt, "second");
    assert!(reports.iter().all(|r| r.is_success()));
    assert_ne!(reports[0].run_id, reports[1].run_id);
    assert_eq!(ledger.len().await, 2);
}

#[tokio::test]
async fn test_failed_repair_keeps_last_candidate() {
    // The repair call gets no reply and fails with a 503.
    let provider = Arc::new(MockLlmProvider::new(vec![phone_reply()]));
    let ledger = Arc::new(MemoryLedger::new());
    let orchestrator = orchestrator(provider.clone(), SynthesisConfig::default())
        .with_ledger(ledger.clone());

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("clean phone numbers", customers()),
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(
        report.failure_category(),
        Some(RunFailureCategory::GeneratorUnavailable)
    );
    assert_eq!(provider.calls(), 2);
    assert_eq!(report.iterations_used, 1);
    assert_eq!(report.validation_errors.len(), 1);
    let spec = report.specification.as_ref().expect("last candidate kept");
    assert_eq!(spec.version, 1);
    assert_eq!(spec.operations.len(), 1);

    let record = ledger.load(&report.run_id).await.expect("recorded");
    assert_eq!(record.specification, report.specification);
}

#[tokio::test]
async fn test_execution_timeout_is_generator_unavailable() {
    let (dataset, spec) = heavy_workload();
    let config = SynthesisConfig::default().with_execution_timeout(Duration::from_millis(1));
    let orchestrator = SynthesisOrchestrator::new(Arc::new(FixedGenerator { spec }), config);

    let report = orchestrator
        .synthesize(
            SynthesisRequest::new("normalize emails", dataset),
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(
        report.failure_category(),
        Some(RunFailureCategory::GeneratorUnavailable)
    );
    assert!(report
        .failure
        .as_ref()
        .expect("failure")
        .message
        .contains("execution did not finish"));
    let trace: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(
        &trace[trace.len() - 2..],
        &[Phase::Executing, Phase::Failed]
    );
    assert_eq!(report.iterations_used, 0);
}

#[tokio::test]
async fn test_cancellation_during_execution() {
    let (dataset, spec) = heavy_workload();
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let orchestrator =
        SynthesisOrchestrator::new(Arc::new(FixedGenerator { spec }), SynthesisConfig::default())
            .with_events(tx);
    let cancel = CancelHandle::new();

    let trigger = cancel.clone();
    let listener = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let SynthesisEvent::PhaseChanged {
                phase: Phase::Executing,
                ..
            } = event
            {
                trigger.cancel();
            }
        }
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.synthesize(SynthesisRequest::new("normalize emails", dataset), &cancel),
    )
    .await
    .expect("cancellation ends the run promptly");
    drop(orchestrator);
    listener.await.expect("listener");

    assert_eq!(report.failure_category(), Some(RunFailureCategory::Cancelled));
    let trace: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(
        &trace[trace.len() - 2..],
        &[Phase::Executing, Phase::Failed]
    );
    assert!(report.output_sample.is_none());
}

#[test]
fn test_execute_from_crate_root() {
    let spec = PipelineSpecification::from_json(
        r#"{"id": "p1", "version": 1, "created_from_prompt": "lowercase emails",
            "operations": [{"kind": "normalize-field", "field": "email", "op": "lowercase"}]}"#,
    )
    .expect("parse");

    let output = pipeforge::execute(&spec, &customers()).expect("execute");
    assert_eq!(output.row_count(), 3);
    assert_eq!(output.rows()[2]["email"], json!("b@y.org"));
}
