use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;
use crate::classifier::ClassificationUsage;
use crate::documents::DocumentError;
use crate::export::ExportError;
use crate::extractor::{Candidate, ExtractionMetadata};
use crate::learning::SuggestedRule;
use crate::locks::TenderLockError;
use crate::rules::{CustomerProfile, RuleError, TemperatureCategory};
use crate::shipment::StructuredShipment;
use crate::storage::StorageError;
use crate::tender::{ExtractionRun, StoreError, Tender};
use crate::verifier::{FieldProvenance, NormalizationReport, VerificationWarning};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Tender not found: {0}")]
    TenderNotFound(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Idempotency key was already used with a different request")]
    IdempotencyConflict,

    #[error("A request with this idempotency key is still running")]
    RequestInFlight,

    #[error(transparent)]
    Locked(#[from] TenderLockError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Where a new tender's text comes from.
#[derive(Debug, Clone)]
pub enum TenderInput {
    /// Pasted email or message body.
    Text(String),
    /// Uploaded document; converted to text before extraction.
    File { file_name: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct CreateTender {
    pub customer_id: Option<String>,
    pub input: TenderInput,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateTenderOutcome {
    pub id: String,
    pub candidates_count: usize,
    pub has_llm_output: bool,
    /// An identical upload was found and returned instead of a new tender.
    pub deduped: bool,
}

/// Current pipeline output for a tender.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionView {
    pub candidates: Vec<Candidate>,
    pub metadata: ExtractionMetadata,
    pub llm_output: Option<StructuredShipment>,
    pub warnings: Vec<VerificationWarning>,
    pub provenance: BTreeMap<String, FieldProvenance>,
    pub normalization: Option<NormalizationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ClassificationUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ExtractionRun> for ExtractionView {
    fn from(run: ExtractionRun) -> Self {
        Self {
            candidates: run.candidates,
            metadata: run.metadata,
            llm_output: run.llm_output,
            warnings: run.warnings,
            provenance: run.provenance,
            normalization: run.normalization,
            usage: run.usage,
            error: run.error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenderDetail {
    pub tender: Tender,
    pub extraction: Option<ExtractionView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReprocessOutcome {
    pub tender: Tender,
    pub extraction: ExtractionView,
    pub customer: Option<CustomerProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveFinal {
    pub shipment: StructuredShipment,
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Propose the detected rules on the customer profile.
    #[serde(default = "default_apply_suggested_rules")]
    pub apply_suggested_rules: bool,
}

fn default_apply_suggested_rules() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveFinalOutcome {
    pub id: String,
    pub suggested_rules: Vec<SuggestedRule>,
    pub learning_events: usize,
    #[serde(default)]
    pub learned_commodities: Vec<TemperatureCategory>,
}
