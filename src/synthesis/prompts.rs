//! Prompt templates for the LLM-backed specification generator.

use crate::spec::{schema_for, OperationKind, PipelineSpecification};
use crate::table::TabularValue;
use crate::validation::ValidationError;

/// System prompt. `{vocabulary}` is replaced with the operation reference.
pub const SYSTEM_PROMPT: &str = r#"You design deterministic data-transformation pipelines.

Given a goal and a sample of a tabular dataset, reply with a single JSON object:

{"operations": [ ... ], "declared_outputs": ["column", ...]}

Each operation is an object with a "kind" and that kind's parameters, listed
flat next to "kind". Operations run strictly in order; each one sees the
output of the previous one. Use only these kinds and parameters (? = optional):

{vocabulary}

Parameter values:
- filter.op: eq, ne, gt, gte, lt, lte, contains, starts-with, matches, empty, not-empty
- normalize-field.op: lowercase, uppercase, trim, collapse-whitespace, digits-only, to-number, to-boolean
- deduplicate.keep: first, last; order_by picks the surviving row (first = lowest, last = highest)
- derive-column.op: add, subtract, multiply, divide, concat, copy, constant
- derive-column.inputs: [{"column": "name"} or {"value": literal}, ...]
- aggregate.aggregations: [{"column": "name", "function": "count|sum|mean|min|max", "as": "output"}]

List in "declared_outputs" the columns the final output must contain.
Reply with JSON only."#;

/// First-attempt user prompt.
pub const GENERATION_PROMPT: &str = r#"Goal:
{prompt}

Dataset columns (inferred types):
{schema}

Sample rows ({sample_count} of {row_count}):
{sample}"#;

/// Repair user prompt: the first-attempt context plus the failed attempt.
pub const REPAIR_PROMPT: &str = r#"

Your previous pipeline (version {version}) failed validation:
{previous}

Errors:
{errors}

Return a corrected pipeline that fixes every error."#;

/// Renders the operation reference from the parameter schemas.
pub fn vocabulary_reference() -> String {
    OperationKind::ALL
        .iter()
        .map(|kind| {
            let params: Vec<String> = schema_for(*kind)
                .iter()
                .map(|p| {
                    if p.required {
                        p.name.to_string()
                    } else {
                        format!("{}?", p.name)
                    }
                })
                .collect();
            format!("- {}: {}", kind, params.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn system_prompt() -> String {
    SYSTEM_PROMPT.replace("{vocabulary}", &vocabulary_reference())
}

/// Renders the user prompt for one generation attempt.
pub fn user_prompt(
    prompt: &str,
    sample: &TabularValue,
    total_rows: usize,
    previous: Option<&PipelineSpecification>,
    prior_errors: &[ValidationError],
) -> String {
    let schema = sample
        .schema()
        .iter()
        .map(|(name, kind)| format!("- {} ({})", name, kind))
        .collect::<Vec<_>>()
        .join("\n");
    let rows = serde_json::to_string_pretty(sample.rows()).unwrap_or_else(|_| "[]".to_string());

    let mut text = GENERATION_PROMPT
        .replace("{prompt}", prompt)
        .replace("{schema}", &schema)
        .replace("{sample_count}", &sample.row_count().to_string())
        .replace("{row_count}", &total_rows.to_string())
        .replace("{sample}", &rows);

    if let Some(previous) = previous {
        let ops = serde_json::to_string_pretty(&previous.operations)
            .unwrap_or_else(|_| "[]".to_string());
        let errors = prior_errors
            .iter()
            .map(|e| format!("- {}", e))
            .collect::<Vec<_>>()
            .join("\n");
        text.push_str(
            &REPAIR_PROMPT
                .replace("{version}", &previous.version.to_string())
                .replace("{previous}", &ops)
                .replace("{errors}", &errors),
        );
    }

    text
}
