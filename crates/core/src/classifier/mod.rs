//! LLM-backed shipment classification.
//!
//! The classifier builds one prompt from the tender text, the extracted
//! candidates and the customer's conventions, makes a single model call,
//! validates the JSON it gets back against a strict schema and runs the
//! verifier over the result.

mod config;
mod llm;
mod payload;
mod prompt;
mod service;

pub use config::{ClassifierConfig, LlmProvider};
pub use llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError, LlmUsage,
    OllamaClient,
};
pub use service::{
    ClassificationFailure, ClassificationInput, ClassificationResult, ClassificationUsage,
    ClassifierError, ShipmentClassifier, ShipmentClassifierConfig,
};
