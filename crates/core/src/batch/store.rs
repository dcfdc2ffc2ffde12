use super::{Batch, BatchError, BatchStatus, ItemUpdate, NewBatch};

/// Persistence for batches and their items.
pub trait BatchStore: Send + Sync {
    /// Create a batch with one queued item per file name, in order.
    fn create_batch(&self, batch: NewBatch) -> Result<Batch, BatchError>;

    fn get_batch(&self, id: &str) -> Result<Option<Batch>, BatchError>;

    fn update_item(&self, item_id: &str, update: ItemUpdate) -> Result<(), BatchError>;

    fn set_status(&self, batch_id: &str, status: BatchStatus) -> Result<(), BatchError>;
}
