//! Candidate and extraction result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rules::{CustomerProfile, RuleType};
use crate::segmenter::BlockType;
use crate::shipment::RefSubtype;

/// Kind of span found by the extractor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CandidateType {
    ReferenceNumber,
    Date,
    Time,
    Datetime,
    Address,
    CityStateZip,
    Weight,
    Pieces,
    Dimensions,
    Temperature,
    Commodity,
    StopBlock,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::ReferenceNumber => "reference_number",
            CandidateType::Date => "date",
            CandidateType::Time => "time",
            CandidateType::Datetime => "datetime",
            CandidateType::Address => "address",
            CandidateType::CityStateZip => "city_state_zip",
            CandidateType::Weight => "weight",
            CandidateType::Pieces => "pieces",
            CandidateType::Dimensions => "dimensions",
            CandidateType::Temperature => "temperature",
            CandidateType::Commodity => "commodity",
            CandidateType::StopBlock => "stop_block",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn score(&self) -> f64 {
        match self {
            Confidence::Low => 0.4,
            Confidence::Medium => 0.7,
            Confidence::High => 0.9,
        }
    }
}

/// Byte range `[start, end)` in the source text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub start: usize,
    pub end: usize,
}

/// A span extracted from tender text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    #[serde(rename = "type")]
    pub candidate_type: CandidateType,
    /// Normalized value (dates as YYYY-MM-DD, times as HH:MM, ...).
    pub value: String,
    /// Exact substring of the source.
    pub raw_match: String,
    pub label_hint: Option<String>,
    pub subtype: Option<RefSubtype>,
    pub confidence: Confidence,
    pub position: Position,
    pub context: String,
    pub block_type: BlockType,
    /// Rule that determined this candidate's subtype or value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// Options for [`extract_candidates`](super::extract_candidates).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions<'a> {
    pub customer_profile: Option<&'a CustomerProfile>,
}

/// A rule that changed or produced a candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedRule {
    pub rule_id: String,
    pub rule_type: RuleType,
    pub candidate_index: Option<usize>,
    pub position: Position,
    pub value: String,
    pub description: String,
}

/// A rule that matched but was not applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedRule {
    pub rule_id: String,
    pub rule_type: RuleType,
    pub candidate_index: Option<usize>,
    pub position: Option<Position>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppliedCustomerRules {
    pub applied: Vec<AppliedRule>,
    pub skipped: Vec<SkippedRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentSummary {
    #[serde(rename = "type")]
    pub segment_type: BlockType,
    pub start_index: usize,
    pub end_index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionMetadata {
    pub candidate_counts: BTreeMap<String, usize>,
    pub header_end: usize,
    pub segments: Vec<SegmentSummary>,
    pub applied_customer_rules: AppliedCustomerRules,
    pub rules_applied_count: usize,
    pub rules_skipped_count: usize,
    /// Commodity suggested by the customer's temperature hints, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_commodity: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionOutput {
    pub candidates: Vec<Candidate>,
    pub metadata: ExtractionMetadata,
}
