use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

/// Page size used when a query does not ask for one.
pub const DEFAULT_AUDIT_PAGE: i64 = 100;

/// Largest page a single query may return.
pub const MAX_AUDIT_PAGE: i64 = 1000;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Which audit records to return. Empty fields match everything.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditFilter {
    pub tender_id: Option<String>,
    /// Any of these event types.
    pub event_types: Vec<String>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            tender_id: None,
            event_types: Vec::new(),
            user_id: None,
            since: None,
            until: None,
            limit: DEFAULT_AUDIT_PAGE,
            offset: 0,
        }
    }
}

impl AuditFilter {
    /// Everything recorded for one tender.
    pub fn for_tender(tender_id: impl Into<String>) -> Self {
        Self {
            tender_id: Some(tender_id.into()),
            ..Default::default()
        }
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    /// Set the page, clamping the size to `1..=MAX_AUDIT_PAGE` and the
    /// offset to non-negative.
    pub fn page(mut self, limit: Option<i64>, offset: Option<i64>) -> Self {
        self.limit = limit
            .unwrap_or(DEFAULT_AUDIT_PAGE)
            .clamp(1, MAX_AUDIT_PAGE);
        self.offset = offset.unwrap_or(0).max(0);
        self
    }
}

/// Persistence for the audit log. Records are append-only.
pub trait AuditStore: Send + Sync {
    /// Append a record and return its row id.
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Newest first, paginated by the filter.
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Matching records, ignoring pagination.
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_clamps() {
        let f = AuditFilter::default().page(Some(50_000), Some(-3));
        assert_eq!(f.limit, MAX_AUDIT_PAGE);
        assert_eq!(f.offset, 0);

        let f = AuditFilter::default().page(Some(0), None);
        assert_eq!(f.limit, 1);

        let f = AuditFilter::default().page(None, Some(20));
        assert_eq!((f.limit, f.offset), (DEFAULT_AUDIT_PAGE, 20));
    }

    #[test]
    fn test_builders_accumulate_event_types() {
        let f = AuditFilter::for_tender("t-1")
            .of_type("rule_proposed")
            .of_type("rule_status_changed")
            .by_user("alice");
        assert_eq!(f.tender_id.as_deref(), Some("t-1"));
        assert_eq!(f.event_types, vec!["rule_proposed", "rule_status_changed"]);
        assert_eq!(f.user_id.as_deref(), Some("alice"));
    }
}
