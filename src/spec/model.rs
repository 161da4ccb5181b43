//! Pipeline specification values.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::operation::Operation;
use crate::error::SpecError;

/// An ordered, versioned list of operations.
///
/// Specifications are never edited in place: a repair produces a new value via
/// [`PipelineSpecification::revised`], so earlier versions stay inspectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpecification {
    pub id: String,
    pub version: u32,
    pub operations: Vec<Operation>,
    pub created_from_prompt: String,
    /// Columns the output is expected to contain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_outputs: Vec<String>,
}

impl PipelineSpecification {
    /// Creates version 1 of a new specification with a fresh id.
    pub fn new(prompt: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            version: 1,
            operations,
            created_from_prompt: prompt.into(),
            declared_outputs: Vec::new(),
        }
    }

    pub fn with_declared_outputs(mut self, columns: Vec<String>) -> Self {
        self.declared_outputs = columns;
        self
    }

    /// Builds the next version of this specification from replacement
    /// operations. The id and prompt carry over.
    pub fn revised(&self, operations: Vec<Operation>, declared_outputs: Vec<String>) -> Self {
        Self {
            id: self.id.clone(),
            version: self.version + 1,
            operations,
            created_from_prompt: self.created_from_prompt.clone(),
            declared_outputs,
        }
    }

    /// A specification is complete when it has at least one operation.
    pub fn is_complete(&self) -> bool {
        !self.operations.is_empty()
    }

    /// SHA-256 over the canonical JSON of the operations and declared outputs.
    ///
    /// Two specifications with the same fingerprint execute identically,
    /// whatever their id or version.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "operations": self.operations,
            "declared_outputs": self.declared_outputs,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        serde_json::from_str(json).map_err(|e| SpecError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SpecError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), SpecError> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

/// Returns the ordered operation indices that differ between two
/// specifications: changed in place, added at the end, or removed from the end.
///
/// Comparison is positional. Used for observability only.
pub fn diff(previous: &PipelineSpecification, current: &PipelineSpecification) -> Vec<usize> {
    let longest = previous.operations.len().max(current.operations.len());
    (0..longest)
        .filter(|&i| previous.operations.get(i) != current.operations.get(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lowercase_email() -> Operation {
        Operation::new("normalize-field", json!({"field": "email", "op": "lowercase"}))
    }

    fn dedupe_email() -> Operation {
        Operation::new("deduplicate", json!({"key": "email"}))
    }

    #[test]
    fn test_new_starts_at_version_one() {
        let spec = PipelineSpecification::new("clean emails", vec![lowercase_email()]);
        assert_eq!(spec.version, 1);
        assert!(spec.is_complete());
        assert!(Uuid::parse_str(&spec.id).is_ok());
    }

    #[test]
    fn test_revised_keeps_identity_and_original() {
        let v1 = PipelineSpecification::new("clean emails", vec![lowercase_email()]);
        let v2 = v1.revised(vec![lowercase_email(), dedupe_email()], Vec::new());

        assert_eq!(v2.id, v1.id);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.created_from_prompt, "clean emails");
        assert_eq!(v1.operations.len(), 1);
    }

    #[test]
    fn test_diff_positions() {
        let v1 = PipelineSpecification::new("p", vec![lowercase_email(), dedupe_email()]);
        let same = v1.revised(v1.operations.clone(), Vec::new());
        assert!(diff(&v1, &same).is_empty());

        let changed = v1.revised(
            vec![
                lowercase_email(),
                Operation::new("deduplicate", json!({"key": "email", "keep": "last"})),
                Operation::new("sort", json!({"by": "email"})),
            ],
            Vec::new(),
        );
        assert_eq!(diff(&v1, &changed), vec![1, 2]);

        let shorter = v1.revised(vec![lowercase_email()], Vec::new());
        assert_eq!(diff(&v1, &shorter), vec![1]);
    }

    #[test]
    fn test_fingerprint_ignores_identity() {
        let a = PipelineSpecification::new("p", vec![lowercase_email()]);
        let b = PipelineSpecification::new("other prompt", vec![lowercase_email()]);
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let c = PipelineSpecification::new("p", vec![dedupe_email()]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spec.json");

        let spec = PipelineSpecification::new("clean emails", vec![lowercase_email(), dedupe_email()])
            .with_declared_outputs(vec!["email".to_string()]);
        spec.to_file(&path).expect("write");

        let loaded = PipelineSpecification::from_file(&path).expect("read");
        assert_eq!(loaded, spec);

        let text = std::fs::read_to_string(&path).expect("read text");
        assert!(text.contains("\"kind\": \"normalize-field\""));
    }

    #[test]
    fn test_from_json_reports_parse_error() {
        let err = PipelineSpecification::from_json("{not json").unwrap_err();
        assert!(matches!(err, SpecError::Parse(_)));
    }
}
