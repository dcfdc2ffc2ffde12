//! Customer profile storage trait.

use super::{CustomerProfile, RuleError};

/// Request to create a customer profile.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    /// Caller-chosen id; generated when absent.
    pub id: Option<String>,
    pub name: String,
    pub prompt_notes: Option<String>,
}

/// Persistence for customer profiles and their embedded rules.
pub trait CustomerStore: Send + Sync {
    fn create(&self, request: CreateCustomer) -> Result<CustomerProfile, RuleError>;

    fn get(&self, id: &str) -> Result<Option<CustomerProfile>, RuleError>;

    fn list(&self) -> Result<Vec<CustomerProfile>, RuleError>;

    /// Persist `profile` if the stored version still equals `expected_version`.
    ///
    /// Returns the saved profile with its version bumped, or
    /// [`RuleError::VersionConflict`] when another writer got there first.
    fn save(
        &self,
        profile: &CustomerProfile,
        expected_version: u64,
    ) -> Result<CustomerProfile, RuleError>;
}
