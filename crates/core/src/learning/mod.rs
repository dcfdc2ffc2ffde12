//! Learning from user corrections.
//!
//! Compares the classifier's shipment with the version a user saved after
//! review and turns the differences into suggested rules and learning
//! events. Everything here is a pure function of its inputs.

mod commodity;
mod edits;
mod reclassify;
mod types;

pub use commodity::{apply_commodity_learning, temperature_category};
pub use edits::detect_all_edits;
pub use reclassify::{derive_pattern, detect_reclassifications, is_rule_already_learned};
pub use types::*;
