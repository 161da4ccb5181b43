//! LLM integration for pipeforge.
//!
//! The synthesis loop reaches its external generator through the
//! [`LlmProvider`] trait. [`LiteLlmClient`] implements it over any
//! OpenAI-compatible chat-completions endpoint.
//!
//! ```ignore
//! use pipeforge::llm::{CompletionRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = CompletionRequest::new("", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, CompletionRequest, CompletionResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
