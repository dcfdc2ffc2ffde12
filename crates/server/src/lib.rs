//! HTTP surface for tenderdesk: router, middleware, handlers and state.

pub mod api;
pub mod metrics;
pub mod state;
