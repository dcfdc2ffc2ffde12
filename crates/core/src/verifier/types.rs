//! Provenance and warning types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NormalizationReport;
use crate::extractor::Candidate;
use crate::rules::CustomerProfile;
use crate::shipment::StructuredShipment;

/// How the tender text arrived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TenderSource {
    /// Pasted email body.
    Paste,
    /// Uploaded document.
    File,
}

impl TenderSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenderSource::Paste => "paste",
            TenderSource::File => "file",
        }
    }

    /// Source type for values grounded in this tender's text.
    pub fn text_source_type(&self) -> SourceType {
        match self {
            TenderSource::Paste => SourceType::EmailText,
            TenderSource::File => SourceType::DocumentText,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    DocumentText,
    EmailText,
    Rule,
    UserEdit,
    LlmInference,
}

/// A span of source text supporting a field value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub match_text: String,
    pub char_start: usize,
    pub char_end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_index: Option<usize>,
}

/// Where a field's value came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldProvenance {
    pub source_type: SourceType,
    /// 0.0 to 1.0.
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WarningReason {
    UnsupportedBySource,
    WeakEvidence,
    AmbiguousMatch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WarningCategory {
    Hallucinated,
    Unverified,
}

/// A field whose value is not (well) supported by the source.
///
/// The category is derived from reason and source type and cannot be set
/// independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WarningWire", from = "WarningWire")]
pub struct VerificationWarning {
    path: String,
    value: String,
    reason: WarningReason,
    source_type: SourceType,
}

impl VerificationWarning {
    pub fn new(
        path: impl Into<String>,
        value: impl Into<String>,
        reason: WarningReason,
        source_type: SourceType,
    ) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            reason,
            source_type,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn reason(&self) -> WarningReason {
        self.reason
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    /// Only unsupported model inference is a hallucination.
    pub fn category(&self) -> WarningCategory {
        match (self.reason, self.source_type) {
            (WarningReason::UnsupportedBySource, SourceType::LlmInference) => {
                WarningCategory::Hallucinated
            }
            _ => WarningCategory::Unverified,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WarningWire {
    path: String,
    value: String,
    reason: WarningReason,
    #[serde(default)]
    category: Option<WarningCategory>,
    source_type: SourceType,
}

impl From<VerificationWarning> for WarningWire {
    fn from(w: VerificationWarning) -> Self {
        Self {
            category: Some(w.category()),
            path: w.path,
            value: w.value,
            reason: w.reason,
            source_type: w.source_type,
        }
    }
}

impl From<WarningWire> for VerificationWarning {
    fn from(w: WarningWire) -> Self {
        // a stored category is ignored and recomputed
        Self {
            path: w.path,
            value: w.value,
            reason: w.reason,
            source_type: w.source_type,
        }
    }
}

/// Input to [`verify_shipment`](super::verify_shipment).
#[derive(Debug, Clone)]
pub struct VerificationInput<'a> {
    pub shipment: StructuredShipment,
    pub candidates: &'a [Candidate],
    pub original_text: &'a str,
    pub source: TenderSource,
    /// Profile whose rules produced rule-tagged candidates.
    pub customer_profile: Option<&'a CustomerProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationOutput {
    pub shipment: StructuredShipment,
    pub warnings: Vec<VerificationWarning>,
    pub provenance: BTreeMap<String, FieldProvenance>,
    pub normalization: NormalizationReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_is_derived() {
        let w = VerificationWarning::new(
            "cargo.commodity",
            "Steel",
            WarningReason::UnsupportedBySource,
            SourceType::LlmInference,
        );
        assert_eq!(w.category(), WarningCategory::Hallucinated);

        let w = VerificationWarning::new(
            "cargo.commodity",
            "Steel",
            WarningReason::UnsupportedBySource,
            SourceType::DocumentText,
        );
        assert_eq!(w.category(), WarningCategory::Unverified);

        let w = VerificationWarning::new(
            "cargo.commodity",
            "Steel",
            WarningReason::WeakEvidence,
            SourceType::LlmInference,
        );
        assert_eq!(w.category(), WarningCategory::Unverified);
    }

    #[test]
    fn test_stored_category_is_ignored() {
        let json = r#"{"path":"p","value":"v","reason":"weak_evidence","category":"hallucinated","source_type":"llm_inference"}"#;
        let w: VerificationWarning = serde_json::from_str(json).unwrap();
        assert_eq!(w.category(), WarningCategory::Unverified);

        let out = serde_json::to_value(&w).unwrap();
        assert_eq!(out["category"], "unverified");
    }

    #[test]
    fn test_text_source_type() {
        assert_eq!(TenderSource::Paste.text_source_type(), SourceType::EmailText);
        assert_eq!(TenderSource::File.text_source_type(), SourceType::DocumentText);
    }
}
