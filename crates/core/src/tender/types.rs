//! Tender and extraction run types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::ClassificationUsage;
use crate::extractor::{Candidate, ExtractionMetadata};
use crate::shipment::StructuredShipment;
use crate::verifier::{FieldProvenance, NormalizationReport, TenderSource, VerificationWarning};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Tender not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// An inbound freight document and its review state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tender {
    pub id: String,
    pub customer_id: Option<String>,
    pub source_type: TenderSource,
    pub original_text: String,
    pub file_name: Option<String>,
    /// Object storage key of the uploaded original.
    pub file_key: Option<String>,
    /// Hex SHA-256 of the uploaded bytes.
    pub file_hash: Option<String>,
    pub batch_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Shipment as saved by the reviewer.
    pub final_shipment: Option<StructuredShipment>,
    pub finalized_by: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewTender {
    pub customer_id: Option<String>,
    pub source_type: TenderSource,
    pub original_text: String,
    pub file_name: Option<String>,
    pub file_key: Option<String>,
    pub file_hash: Option<String>,
    pub batch_id: Option<String>,
    pub created_by: String,
}

/// One pass of the pipeline over a tender. Runs are append-only; the most
/// recent one is current.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionRun {
    pub id: String,
    pub tender_id: String,
    pub customer_id: Option<String>,
    pub candidates: Vec<Candidate>,
    pub metadata: ExtractionMetadata,
    /// Verified classifier output; absent when classification failed.
    pub llm_output: Option<StructuredShipment>,
    pub warnings: Vec<VerificationWarning>,
    pub provenance: BTreeMap<String, FieldProvenance>,
    pub normalization: Option<NormalizationReport>,
    pub usage: Option<ClassificationUsage>,
    /// Classification error, kept so a reviewer can see why output is missing.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewExtractionRun {
    pub tender_id: String,
    pub customer_id: Option<String>,
    pub candidates: Vec<Candidate>,
    pub metadata: ExtractionMetadata,
    pub llm_output: Option<StructuredShipment>,
    pub warnings: Vec<VerificationWarning>,
    pub provenance: BTreeMap<String, FieldProvenance>,
    pub normalization: Option<NormalizationReport>,
    pub usage: Option<ClassificationUsage>,
    pub error: Option<String>,
}

/// Filter for listing tenders, newest first.
#[derive(Debug, Clone)]
pub struct TenderFilter {
    pub customer_id: Option<String>,
    pub batch_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TenderFilter {
    fn default() -> Self {
        Self {
            customer_id: None,
            batch_id: None,
            limit: 100,
            offset: 0,
        }
    }
}
