//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Intake (tenders created, extraction, classification, verification)
//! - Learning (rules applied and proposed)
//! - Batches and exports
//! - External services (LLM, TMS export)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Intake Metrics
// =============================================================================

/// Tenders created by source and outcome.
pub static TENDERS_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tenderdesk_tenders_created_total", "Total tenders created"),
        &["source", "outcome"], // source: "paste", "file"; outcome: "created", "deduped"
    )
    .unwrap()
});

/// Candidates extracted per run.
pub static CANDIDATES_EXTRACTED: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tenderdesk_candidates_extracted",
            "Number of candidates extracted per tender",
        )
        .buckets(vec![0.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        &[],
    )
    .unwrap()
});

/// Classification duration in seconds.
pub static CLASSIFICATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tenderdesk_classification_duration_seconds",
            "Duration of shipment classification including retries",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

/// Verification warnings by category.
pub static VERIFICATION_WARNINGS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tenderdesk_verification_warnings_total",
            "Verification warnings raised",
        ),
        &["category"],
    )
    .unwrap()
});

/// Retries performed around external calls.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tenderdesk_retry_attempts_total", "Total retry attempts"),
        &["operation"], // "classify", "save_profile"
    )
    .unwrap()
});

// =============================================================================
// Learning Metrics
// =============================================================================

/// Customer rules applied during extraction, by rule type.
pub static RULES_APPLIED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tenderdesk_rules_applied_total",
            "Customer rules applied during extraction",
        ),
        &["rule_type"],
    )
    .unwrap()
});

/// Rules proposed from user corrections.
pub static RULES_PROPOSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tenderdesk_rules_proposed_total",
            "Rules proposed from user corrections",
        ),
        &["outcome"], // "created", "reinforced"
    )
    .unwrap()
});

/// Learning events recorded from final shipments.
pub static LEARNING_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tenderdesk_learning_events_total",
        "Learning events recorded from user edits",
    )
    .unwrap()
});

// =============================================================================
// Batch and Export Metrics
// =============================================================================

/// Batch items processed by result.
pub static BATCH_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tenderdesk_batch_items_total", "Batch items processed"),
        &["result"], // "completed", "failed"
    )
    .unwrap()
});

/// Export attempts by provider and result.
pub static EXPORTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tenderdesk_exports_total", "Export attempts"),
        &["provider", "mode", "result"], // mode: "dry_run", "live"
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// External service request duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tenderdesk_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// LLM tokens used.
pub static LLM_TOKENS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tenderdesk_llm_tokens_total", "Total LLM tokens used"),
        &["model", "direction"], // direction: "input", "output"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Intake
        Box::new(TENDERS_CREATED.clone()),
        Box::new(CANDIDATES_EXTRACTED.clone()),
        Box::new(CLASSIFICATION_DURATION.clone()),
        Box::new(VERIFICATION_WARNINGS.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        // Learning
        Box::new(RULES_APPLIED.clone()),
        Box::new(RULES_PROPOSED.clone()),
        Box::new(LEARNING_EVENTS.clone()),
        // Batches and exports
        Box::new(BATCH_ITEMS.clone()),
        Box::new(EXPORTS_TOTAL.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(LLM_TOKENS.clone()),
    ]
}
