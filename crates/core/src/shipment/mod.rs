//! Canonical shipment model.
//!
//! `StructuredShipment` is the parsed form of a tender: shipment-level
//! reference numbers, an ordered list of stops and the cargo block. It is
//! produced by the classifier, rewritten by the verifier's normalization
//! pass and finally edited by a human reviewer.

mod types;

pub use types::*;
