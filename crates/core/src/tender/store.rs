//! Tender persistence trait.

use chrono::{DateTime, Utc};

use super::{ExtractionRun, NewExtractionRun, NewTender, StoreError, Tender, TenderFilter};
use crate::learning::LearningEvent;
use crate::shipment::StructuredShipment;

pub trait TenderStore: Send + Sync {
    fn create_tender(&self, tender: NewTender) -> Result<Tender, StoreError>;

    /// Create `tender` unless one with the same customer and file hash was
    /// created within `window_days`. Lookup and insert happen atomically.
    ///
    /// Returns the tender and whether it is a pre-existing duplicate.
    fn create_unless_duplicate(
        &self,
        tender: NewTender,
        window_days: u32,
    ) -> Result<(Tender, bool), StoreError>;

    fn get_tender(&self, id: &str) -> Result<Option<Tender>, StoreError>;

    fn list_tenders(&self, filter: &TenderFilter) -> Result<Vec<Tender>, StoreError>;

    /// Most recent tender for `(customer_id, file_hash)` created after
    /// `now - window_days`.
    fn find_duplicate(
        &self,
        customer_id: Option<&str>,
        file_hash: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Tender>, StoreError>;

    fn set_customer(&self, id: &str, customer_id: Option<&str>) -> Result<Tender, StoreError>;

    fn save_final(
        &self,
        id: &str,
        shipment: &StructuredShipment,
        actor: &str,
    ) -> Result<Tender, StoreError>;

    fn append_run(&self, run: NewExtractionRun) -> Result<ExtractionRun, StoreError>;

    fn latest_run(&self, tender_id: &str) -> Result<Option<ExtractionRun>, StoreError>;

    /// All runs for a tender, oldest first.
    fn list_runs(&self, tender_id: &str) -> Result<Vec<ExtractionRun>, StoreError>;

    fn record_learning_events(&self, events: &[LearningEvent]) -> Result<(), StoreError>;

    fn learning_events(&self, customer_id: &str) -> Result<Vec<LearningEvent>, StoreError>;
}
