//! Per-customer learned extraction rules.
//!
//! A [`CustomerProfile`] owns its rules. Rules move through
//! `proposed -> active -> deprecated -> active`; only active rules are
//! consulted by the extractor, and only proposed rules can be deleted.
//!
//! The profile is persisted as a versioned aggregate: every save must quote
//! the version it read, and a stale version is rejected with
//! [`RuleError::VersionConflict`] instead of silently overwriting a
//! concurrent writer.

mod lookup;
mod sqlite;
mod store;
mod types;

pub use lookup::{
    get_active_cargo_hint_rules, get_active_label_map_rules, get_active_regex_map_rules,
    normalize_label, RuleLookup,
};
pub use sqlite::SqliteCustomerStore;
pub use store::{CreateCustomer, CustomerStore};
pub use types::*;
