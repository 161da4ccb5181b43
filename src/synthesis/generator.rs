//! The external specification generator seam.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::prompts;
use crate::error::GeneratorError;
use crate::llm::{CompletionRequest, LlmProvider, Message};
use crate::spec::{Operation, PipelineSpecification};
use crate::table::TabularValue;
use crate::utils::extract_json_object;
use crate::validation::ValidationError;

/// Context sent to the generator for one attempt.
///
/// A repair attempt carries the previous specification and the errors it
/// produced; only the immediate predecessor's errors are included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub dataset_sample: TabularValue,
    /// Row count of the full dataset the sample was taken from.
    pub dataset_rows: usize,
    pub prior_errors: Vec<ValidationError>,
    pub previous_spec: Option<PipelineSpecification>,
    /// 0 for the first generation, then the repair number.
    pub attempt: u32,
}

impl GenerationRequest {
    pub fn is_repair(&self) -> bool {
        self.previous_spec.is_some()
    }
}

/// Produces candidate specifications from a goal and error feedback.
///
/// Implementations return `Err` only for infrastructure failures. A
/// specification that is merely wrong is returned as `Ok` and rejected by the
/// validator.
#[async_trait]
pub trait SpecGenerator: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<PipelineSpecification, GeneratorError>;
}

/// Generator backed by a chat-completion model.
pub struct LlmSpecGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl LlmSpecGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: String::new(),
            temperature: 0.2,
            max_tokens: 4000,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, request: &GenerationRequest) -> CompletionRequest {
        let user = prompts::user_prompt(
            &request.prompt,
            &request.dataset_sample,
            request.dataset_rows,
            request.previous_spec.as_ref(),
            &request.prior_errors,
        );

        CompletionRequest::new(
            self.model.clone(),
            vec![Message::system(prompts::system_prompt()), Message::user(user)],
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl SpecGenerator for LlmSpecGenerator {
    #[instrument(skip(self, request), fields(attempt = request.attempt))]
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<PipelineSpecification, GeneratorError> {
        let completion = self.build_request(&request);
        let response = self.provider.generate(completion).await?;

        let content = response.first_content().ok_or_else(|| {
            GeneratorError::MalformedResponse("response has no choices".to_string())
        })?;
        debug!(chars = content.len(), "Received generator response");

        parse_specification(&request.prompt, content)
    }
}

/// Parses a generator reply into a specification.
///
/// The reply must contain an object with an `operations` array. An operation
/// without a string `kind` is kept with an empty kind so the structural pass
/// reports it and the loop can repair it.
pub fn parse_specification(
    prompt: &str,
    content: &str,
) -> Result<PipelineSpecification, GeneratorError> {
    let value =
        extract_json_object(content).map_err(|e| GeneratorError::MalformedResponse(e.to_string()))?;

    let raw_ops = value
        .get("operations")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            GeneratorError::MalformedResponse("reply has no 'operations' array".to_string())
        })?;

    let mut operations = Vec::with_capacity(raw_ops.len());
    for (idx, raw) in raw_ops.iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            return Err(GeneratorError::MalformedResponse(format!(
                "operation {} is not an object",
                idx
            )));
        };
        let mut parameters: Map<String, Value> = obj.clone();
        let kind = match parameters.remove("kind") {
            Some(Value::String(kind)) => kind,
            _ => String::new(),
        };
        operations.push(Operation { kind, parameters });
    }

    let declared_outputs = value
        .get("declared_outputs")
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(PipelineSpecification::new(prompt, operations).with_declared_outputs(declared_outputs))
}
