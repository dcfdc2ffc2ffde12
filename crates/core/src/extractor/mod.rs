//! Deterministic candidate extraction.
//!
//! Scans tender text with fixed pattern tables and produces [`Candidate`]
//! spans (reference numbers, dates, times, addresses, weights, ...) tagged
//! with position, confidence and context. Active customer rules can resolve
//! or upgrade reference subtypes and add commodity candidates; every rule
//! decision is recorded in [`ExtractionMetadata::applied_customer_rules`].
//!
//! Extraction is a pure function of its inputs: no I/O, and identical input
//! yields an identical, identically ordered candidate list.

mod extract;
mod patterns;
mod rules;
mod types;

pub use extract::{extract_candidates, resolve_overlaps};
pub use patterns::CANDIDATE_PRIORITY;
pub use types::*;
