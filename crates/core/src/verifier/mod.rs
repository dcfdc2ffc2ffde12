//! Verification and normalization of classifier output.
//!
//! Every scalar field the classifier produced is checked against the source
//! text and the extracted candidates. Fields with evidence are attributed to
//! the document (or email) text; fields a customer rule produced are
//! attributed to that rule; anything else is model inference, and inference
//! with no evidence at all is flagged as hallucinated.
//!
//! Before verification the shipment is normalized: misplaced shipment-level
//! references are moved to the stop whose block contains them, duplicate
//! references are dropped and stop sequences are renumbered. Normalization
//! is idempotent and the whole pass is deterministic.

mod evidence;
mod normalize;
mod types;
mod verify;

pub(crate) use normalize::format_quantity;
pub use normalize::{normalize_shipment, CargoSource, NormalizationReport};
pub use types::*;
pub use verify::{user_edit_provenance, verify_shipment};
