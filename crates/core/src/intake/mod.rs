//! Tender intake and review.
//!
//! [`TenderService`] owns the lifecycle of a tender: file conversion and
//! dedupe, the extraction and classification pipeline, reprocessing under
//! an exclusive lock, saving the reviewed shipment with learning, rule
//! administration and TMS export.

mod service;
mod types;

pub use service::{TenderService, TenderServiceConfig};
pub use types::*;
