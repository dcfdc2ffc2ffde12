//! Audit log query endpoint.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenderdesk_core::{AuditFilter, AuditRecord};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub tender_id: Option<String>,
    /// One event type, or several separated by commas
    /// (`rule_proposed,rule_status_changed`).
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    /// RFC 3339, inclusive.
    pub from: Option<DateTime<Utc>>,
    /// RFC 3339, inclusive.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    fn filter(&self) -> AuditFilter {
        let mut filter = AuditFilter {
            tender_id: self.tender_id.clone(),
            user_id: self.user_id.clone(),
            ..Default::default()
        }
        .between(self.from, self.to)
        .page(self.limit, self.offset);

        for event_type in self
            .event_type
            .iter()
            .flat_map(|types| types.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            filter = filter.of_type(event_type);
        }
        filter
    }
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events across all pages.
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let filter = params.filter();
    let events = state.audit_store().query(&filter)?;
    let total = state.audit_store().count(&filter)?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(event_type: Option<&str>, limit: Option<i64>) -> AuditQueryParams {
        AuditQueryParams {
            tender_id: Some("t-1".to_string()),
            event_type: event_type.map(str::to_string),
            user_id: None,
            from: None,
            to: None,
            limit,
            offset: None,
        }
    }

    #[test]
    fn test_event_types_split_on_commas() {
        let filter = params(Some("rule_proposed, rule_status_changed,,"), None).filter();
        assert_eq!(
            filter.event_types,
            vec!["rule_proposed", "rule_status_changed"]
        );
        assert_eq!(filter.tender_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(params(None, Some(5000)).filter().limit, 1000);
        assert_eq!(params(None, None).filter().limit, 100);
    }
}
