//! Shipment classification: one model call, then verification.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::llm::{CompletionRequest, LlmClient, LlmError};
use super::payload::parse_response;
use super::prompt::{system_prompt, user_prompt};
use crate::extractor::Candidate;
use crate::rules::CustomerProfile;
use crate::shipment::{ClassificationMetadata, StructuredShipment};
use crate::verifier::{
    verify_shipment, FieldProvenance, NormalizationReport, TenderSource, VerificationInput,
    VerificationWarning,
};

/// Errors from a classification attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ClassifierError {
    /// Whether running the same classification again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClassifierError::Llm(e) => e.is_retryable(),
            ClassifierError::InvalidResponse(_) => false,
        }
    }
}

/// Token and timing telemetry for one classification, success or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationUsage {
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub duration_ms: u64,
}

pub struct ClassificationInput<'a> {
    pub original_text: &'a str,
    pub candidates: &'a [Candidate],
    pub customer_profile: Option<&'a CustomerProfile>,
    pub source: TenderSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub shipment: StructuredShipment,
    pub warnings: Vec<VerificationWarning>,
    pub provenance: BTreeMap<String, FieldProvenance>,
    pub normalization: NormalizationReport,
    pub usage: ClassificationUsage,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct ClassificationFailure {
    pub error: ClassifierError,
    pub usage: ClassificationUsage,
}

/// Knobs for a classifier instance.
#[derive(Debug, Clone)]
pub struct ShipmentClassifierConfig {
    pub max_tokens: u32,
    pub max_candidates: usize,
}

impl Default for ShipmentClassifierConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            max_candidates: 200,
        }
    }
}

/// Classifies tender text into a verified [`StructuredShipment`].
///
/// Each call to [`classify_and_verify`](Self::classify_and_verify) makes
/// exactly one model request and never retries; retry policy belongs to
/// the caller.
pub struct ShipmentClassifier {
    client: Arc<dyn LlmClient>,
    config: ShipmentClassifierConfig,
}

impl ShipmentClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            config: ShipmentClassifierConfig::default(),
        }
    }

    pub fn with_config(client: Arc<dyn LlmClient>, config: ShipmentClassifierConfig) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub async fn classify_and_verify(
        &self,
        input: ClassificationInput<'_>,
    ) -> Result<ClassificationResult, ClassificationFailure> {
        let request = CompletionRequest::new(user_prompt(
            input.original_text,
            input.candidates,
            input.customer_profile,
            self.config.max_candidates,
        ))
        .with_system(system_prompt())
        .with_max_tokens(self.config.max_tokens)
        .with_temperature(0.0);

        let started = Instant::now();
        let response = self.client.complete(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, duration_ms, "classification call failed");
                return Err(ClassificationFailure {
                    error: e.into(),
                    usage: ClassificationUsage {
                        model: self.client.model().to_string(),
                        duration_ms,
                        ..Default::default()
                    },
                });
            }
        };

        let usage = ClassificationUsage {
            model: response.model.clone(),
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            duration_ms,
        };

        let (mut shipment, confidence_notes) = match parse_response(&response.text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, model = %usage.model, "classifier returned invalid shipment");
                return Err(ClassificationFailure {
                    error: ClassifierError::InvalidResponse(e),
                    usage,
                });
            }
        };
        shipment.classification_metadata = Some(ClassificationMetadata {
            model: usage.model.clone(),
            timestamp: Utc::now(),
            confidence_notes,
        });

        let verified = verify_shipment(VerificationInput {
            shipment,
            candidates: input.candidates,
            original_text: input.original_text,
            source: input.source,
            customer_profile: input.customer_profile,
        });

        tracing::info!(
            model = %usage.model,
            total_tokens = usage.total_tokens,
            duration_ms,
            warnings = verified.warnings.len(),
            "classified shipment"
        );

        Ok(ClassificationResult {
            shipment: verified.shipment,
            warnings: verified.warnings,
            provenance: verified.provenance,
            normalization: verified.normalization,
            usage,
        })
    }
}
