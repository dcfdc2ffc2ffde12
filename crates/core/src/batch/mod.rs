//! Multi-file uploads processed one file at a time.

mod processor;
mod sqlite;
mod store;
mod types;

pub use processor::BatchProcessor;
pub use sqlite::SqliteBatchStore;
pub use store::BatchStore;
pub use types::*;
