pub mod audit;
pub mod batches;
pub mod customers;
pub mod error;
pub mod files;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod tenders;

pub use error::ApiError;
pub use routes::create_router;
