//! Tenders, their append-only extraction runs and learning events.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteTenderStore;
pub use store::TenderStore;
pub use types::*;
