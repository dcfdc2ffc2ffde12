use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Intake
    TenderCreated {
        tender_id: String,
        created_by: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_id: Option<String>,
        source_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        /// True when an identical upload was found and returned instead.
        deduped: bool,
    },
    ExtractionCompleted {
        tender_id: String,
        candidates: usize,
        rules_applied: usize,
        rules_skipped: usize,
    },

    // Model usage
    ClassificationCompleted {
        tender_id: String,
        model: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
        duration_ms: u64,
        attempts: u32,
    },
    ClassificationFailed {
        tender_id: String,
        model: String,
        error: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
        duration_ms: u64,
        attempts: u32,
    },
    VerificationSummary {
        tender_id: String,
        warnings: usize,
        hallucinated: usize,
        unverified: usize,
        refs_moved_to_stops: usize,
        refs_deduplicated: usize,
        stops_resequenced: usize,
        cargo_source: String,
    },

    // Review
    TenderReprocessed {
        tender_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_id: Option<String>,
        /// Served from the idempotency cache without re-running.
        replayed: bool,
    },
    FinalShipmentSaved {
        tender_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_id: Option<String>,
        learning_events: usize,
        suggested_rules: usize,
    },

    // Rules
    RuleProposed {
        customer_id: String,
        rule_id: String,
        rule_type: String,
        pattern: String,
        target_value: String,
        /// False when an equivalent rule was reinforced instead.
        created: bool,
        confidence: f64,
        user_id: String,
    },
    RuleStatusChanged {
        customer_id: String,
        rule_id: String,
        action: String,
        from_status: String,
        /// None when the rule was deleted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_status: Option<String>,
        user_id: String,
    },

    // Batches
    BatchCreated {
        batch_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_id: Option<String>,
        items: usize,
    },
    BatchItemFailed {
        batch_id: String,
        item_id: String,
        file_name: String,
        error: String,
    },

    // Export
    ExportAttempted {
        tender_id: String,
        provider: String,
        user_id: String,
        dry_run: bool,
        success: bool,
        issues: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::TenderCreated { .. } => "tender_created",
            Self::ExtractionCompleted { .. } => "extraction_completed",
            Self::ClassificationCompleted { .. } => "classification_completed",
            Self::ClassificationFailed { .. } => "classification_failed",
            Self::VerificationSummary { .. } => "verification_summary",
            Self::TenderReprocessed { .. } => "tender_reprocessed",
            Self::FinalShipmentSaved { .. } => "final_shipment_saved",
            Self::RuleProposed { .. } => "rule_proposed",
            Self::RuleStatusChanged { .. } => "rule_status_changed",
            Self::BatchCreated { .. } => "batch_created",
            Self::BatchItemFailed { .. } => "batch_item_failed",
            Self::ExportAttempted { .. } => "export_attempted",
        }
    }

    /// Extract tender_id if this event is tender-related
    pub fn tender_id(&self) -> Option<&str> {
        match self {
            Self::TenderCreated { tender_id, .. }
            | Self::ExtractionCompleted { tender_id, .. }
            | Self::ClassificationCompleted { tender_id, .. }
            | Self::ClassificationFailed { tender_id, .. }
            | Self::VerificationSummary { tender_id, .. }
            | Self::TenderReprocessed { tender_id, .. }
            | Self::FinalShipmentSaved { tender_id, .. }
            | Self::ExportAttempted { tender_id, .. } => Some(tender_id),
            _ => None,
        }
    }

    /// Extract user_id if this event was triggered by a user action
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::TenderCreated { created_by, .. } => Some(created_by),
            Self::TenderReprocessed { user_id, .. }
            | Self::FinalShipmentSaved { user_id, .. }
            | Self::RuleProposed { user_id, .. }
            | Self::RuleStatusChanged { user_id, .. }
            | Self::BatchCreated { user_id, .. }
            | Self::ExportAttempted { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub tender_id: Option<String>,
    pub user_id: Option<String>,
    pub data: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tender_created() -> AuditEvent {
        AuditEvent::TenderCreated {
            tender_id: "t-001".to_string(),
            created_by: "user-1".to_string(),
            customer_id: Some("c-1".to_string()),
            source_type: "file".to_string(),
            file_name: Some("load.pdf".to_string()),
            deduped: false,
        }
    }

    #[test]
    fn test_event_type_service_started() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.tender_id(), None);
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_tender_created_ids() {
        let event = tender_created();
        assert_eq!(event.event_type(), "tender_created");
        assert_eq!(event.tender_id(), Some("t-001"));
        assert_eq!(event.user_id(), Some("user-1"));
    }

    #[test]
    fn test_classification_failed_has_tender_but_no_user() {
        let event = AuditEvent::ClassificationFailed {
            tender_id: "t-2".to_string(),
            model: "claude".to_string(),
            error: "rate limited".to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            duration_ms: 12,
            attempts: 3,
        };
        assert_eq!(event.event_type(), "classification_failed");
        assert_eq!(event.tender_id(), Some("t-2"));
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_rule_status_changed_has_user_but_no_tender() {
        let event = AuditEvent::RuleStatusChanged {
            customer_id: "c-1".to_string(),
            rule_id: "r-1".to_string(),
            action: "delete".to_string(),
            from_status: "proposed".to_string(),
            to_status: None,
            user_id: "admin".to_string(),
        };
        assert_eq!(event.tender_id(), None);
        assert_eq!(event.user_id(), Some("admin"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("to_status"));
    }

    #[test]
    fn test_serialize_deserialize_tender_created() {
        let json = serde_json::to_string(&tender_created()).unwrap();
        assert!(json.contains("\"type\":\"tender_created\""));
        assert!(json.contains("\"deduped\":false"));

        let deserialized: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "tender_created");
        assert_eq!(deserialized.tender_id(), Some("t-001"));
    }

    #[test]
    fn test_audit_record_serialize() {
        let record = AuditRecord {
            id: 1,
            timestamp: Utc::now(),
            event_type: "service_started".to_string(),
            tender_id: None,
            user_id: None,
            data: AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"event_type\":\"service_started\""));
    }
}
