//! The persisted form of a finished run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::PipelineSpecification;
use crate::synthesis::{FinalStatus, RunFailureCategory, SynthesisReport};
use crate::table::TabularValue;
use crate::validation::ValidationError;

/// One finished synthesis run, as written to a ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub prompt: String,
    pub input_dataset_ref: String,
    pub specification: Option<PipelineSpecification>,
    pub status: FinalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<RunFailureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    pub iterations_used: u32,
    #[serde(default)]
    pub validation_errors: Vec<ValidationError>,
    pub output_sample: Option<TabularValue>,
    /// SHA-256 of the specification's operations, for replay lookups.
    pub spec_fingerprint: Option<String>,
    pub recorded_at: DateTime<Utc>,
    /// After this instant the record may be purged.
    pub expires_at: DateTime<Utc>,
}

impl RunRecord {
    /// Builds a record from a final report, expiring `ttl` from now.
    pub fn from_report(report: &SynthesisReport, ttl: Duration) -> Self {
        let recorded_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| recorded_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            run_id: report.run_id.clone(),
            prompt: report.prompt.clone(),
            input_dataset_ref: report.input_dataset_ref.clone(),
            specification: report.specification.clone(),
            status: report.final_status,
            failure_category: report.failure_category(),
            failure_message: report.failure.as_ref().map(|f| f.message.clone()),
            iterations_used: report.iterations_used,
            validation_errors: report.validation_errors.clone(),
            output_sample: report.output_sample.clone(),
            spec_fingerprint: report
                .specification
                .as_ref()
                .map(PipelineSpecification::fingerprint),
            recorded_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
