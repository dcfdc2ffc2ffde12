//! Tender lifecycle: intake, reprocessing, review and export.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::auth::Identity;
use crate::classifier::{
    ClassificationFailure, ClassificationInput, ClassificationResult, ShipmentClassifier,
};
use crate::config::{Config, IntakeConfig};
use crate::documents::extract_text;
use crate::export::{DryRunReport, ExportError, ExportPayload, ExportReceipt, ExportRegistry};
use crate::extractor::{extract_candidates, Candidate, ExtractOptions};
use crate::idempotency::{fingerprint, IdempotencyCache, IdempotencyKey, IdempotencyOutcome};
use crate::learning::{
    apply_commodity_learning, detect_all_edits, detect_reclassifications,
    is_rule_already_learned, LearningEvent,
};
use crate::locks::TenderLockManager;
use crate::metrics;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::rules::{CustomerProfile, CustomerRule, CustomerStore, RuleAction, RuleError};
use crate::storage::{ObjectStorage, SignedUrl};
use crate::tender::{ExtractionRun, NewExtractionRun, NewTender, Tender, TenderFilter, TenderStore};
use crate::verifier::{CargoSource, TenderSource, WarningCategory};

use super::types::{
    CreateTender, CreateTenderOutcome, IntakeError, ReprocessOutcome, SaveFinal,
    SaveFinalOutcome, TenderDetail, TenderInput,
};

/// Settings for [`TenderService`].
#[derive(Debug, Clone, Default)]
pub struct TenderServiceConfig {
    pub retry: RetryPolicy,
    pub intake: IntakeConfig,
    /// Lifetime of signed file URLs.
    pub url_ttl: Duration,
}

impl TenderServiceConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry.clone(),
            intake: config.intake.clone(),
            url_ttl: Duration::from_secs(config.storage.url_ttl_secs),
        }
    }
}

/// Drives tenders through extraction, classification and review.
pub struct TenderService {
    tenders: Arc<dyn TenderStore>,
    customers: Arc<dyn CustomerStore>,
    storage: Arc<dyn ObjectStorage>,
    classifier: Option<Arc<ShipmentClassifier>>,
    exports: ExportRegistry,
    audit: Option<AuditHandle>,
    locks: TenderLockManager,
    idempotency: IdempotencyCache,
    config: TenderServiceConfig,
}

impl TenderService {
    pub fn new(
        tenders: Arc<dyn TenderStore>,
        customers: Arc<dyn CustomerStore>,
        storage: Arc<dyn ObjectStorage>,
        config: TenderServiceConfig,
    ) -> Self {
        Self {
            tenders,
            customers,
            storage,
            classifier: None,
            exports: ExportRegistry::new(),
            audit: None,
            locks: TenderLockManager::new(Duration::from_secs(config.intake.lock_ttl_secs)),
            idempotency: IdempotencyCache::new(Duration::from_secs(
                config.intake.idempotency_ttl_secs,
            )),
            config,
        }
    }

    /// Without a classifier, tenders keep extraction candidates only.
    pub fn with_classifier(mut self, classifier: Arc<ShipmentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_exports(mut self, exports: ExportRegistry) -> Self {
        self.exports = exports;
        self
    }

    pub fn tenders(&self) -> &Arc<dyn TenderStore> {
        &self.tenders
    }

    pub fn customers(&self) -> &Arc<dyn CustomerStore> {
        &self.customers
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub fn exports(&self) -> &ExportRegistry {
        &self.exports
    }

    pub fn locks(&self) -> &TenderLockManager {
        &self.locks
    }

    pub fn config(&self) -> &TenderServiceConfig {
        &self.config
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    fn require_tender(&self, id: &str) -> Result<Tender, IntakeError> {
        self.tenders
            .get_tender(id)?
            .ok_or_else(|| IntakeError::TenderNotFound(id.to_string()))
    }

    fn load_profile(&self, customer_id: Option<&str>) -> Result<Option<CustomerProfile>, IntakeError> {
        match customer_id {
            None => Ok(None),
            Some(id) => self
                .customers
                .get(id)?
                .map(Some)
                .ok_or_else(|| IntakeError::CustomerNotFound(id.to_string())),
        }
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Create a tender and run the pipeline over it.
    ///
    /// A classification failure does not fail the call: the tender and a run
    /// carrying the candidates and the error are still persisted.
    pub async fn create_tender(
        &self,
        request: CreateTender,
        actor: &str,
    ) -> Result<CreateTenderOutcome, IntakeError> {
        let profile = self.load_profile(request.customer_id.as_deref())?;

        let (tender, deduped) = match request.input {
            TenderInput::Text(text) => {
                if text.trim().is_empty() {
                    return Err(IntakeError::InvalidInput("tender text is empty".to_string()));
                }
                let tender = self.tenders.create_tender(NewTender {
                    customer_id: request.customer_id.clone(),
                    source_type: TenderSource::Paste,
                    original_text: text,
                    file_name: None,
                    file_key: None,
                    file_hash: None,
                    batch_id: request.batch_id.clone(),
                    created_by: actor.to_string(),
                })?;
                (tender, false)
            }
            TenderInput::File { file_name, bytes } => {
                self.store_file(
                    request.customer_id.clone(),
                    request.batch_id.clone(),
                    file_name,
                    bytes,
                    actor,
                )
                .await?
            }
        };

        if deduped {
            info!(tender_id = %tender.id, "Returning existing tender for duplicate upload");
            metrics::TENDERS_CREATED
                .with_label_values(&[tender.source_type.as_str(), "deduped"])
                .inc();
            self.emit(AuditEvent::TenderCreated {
                tender_id: tender.id.clone(),
                created_by: actor.to_string(),
                customer_id: tender.customer_id.clone(),
                source_type: tender.source_type.as_str().to_string(),
                file_name: tender.file_name.clone(),
                deduped: true,
            })
            .await;
            let latest = self.tenders.latest_run(&tender.id)?;
            return Ok(CreateTenderOutcome {
                id: tender.id,
                candidates_count: latest.as_ref().map_or(0, |r| r.candidates.len()),
                has_llm_output: latest.is_some_and(|r| r.llm_output.is_some()),
                deduped: true,
            });
        }

        metrics::TENDERS_CREATED
            .with_label_values(&[tender.source_type.as_str(), "created"])
            .inc();
        self.emit(AuditEvent::TenderCreated {
            tender_id: tender.id.clone(),
            created_by: actor.to_string(),
            customer_id: tender.customer_id.clone(),
            source_type: tender.source_type.as_str().to_string(),
            file_name: tender.file_name.clone(),
            deduped: false,
        })
        .await;

        let run = self.run_pipeline(&tender, profile.as_ref()).await?;
        info!(
            tender_id = %tender.id,
            candidates = run.candidates.len(),
            has_llm_output = run.llm_output.is_some(),
            "Tender created"
        );

        Ok(CreateTenderOutcome {
            id: tender.id,
            candidates_count: run.candidates.len(),
            has_llm_output: run.llm_output.is_some(),
            deduped: false,
        })
    }

    /// Hash, dedupe, convert and upload a file, then persist its tender.
    async fn store_file(
        &self,
        customer_id: Option<String>,
        batch_id: Option<String>,
        file_name: String,
        bytes: Vec<u8>,
        actor: &str,
    ) -> Result<(Tender, bool), IntakeError> {
        if bytes.is_empty() {
            return Err(IntakeError::InvalidInput(format!("{} is empty", file_name)));
        }
        if bytes.len() > self.config.intake.max_upload_bytes {
            return Err(IntakeError::InvalidInput(format!(
                "{} exceeds the upload limit of {} bytes",
                file_name, self.config.intake.max_upload_bytes
            )));
        }

        let file_hash = hex::encode(Sha256::digest(&bytes));
        let window = self.config.intake.dedupe_window_days;
        if let Some(existing) =
            self.tenders
                .find_duplicate(customer_id.as_deref(), &file_hash, window, Utc::now())?
        {
            return Ok((existing, true));
        }

        let bytes = Arc::new(bytes);
        let text = {
            let name = file_name.clone();
            let bytes = Arc::clone(&bytes);
            tokio::task::spawn_blocking(move || extract_text(&name, &bytes))
                .await
                .map_err(|e| IntakeError::Internal(format!("document conversion panicked: {}", e)))??
        };

        let file_key = format!("tenders/{}/{}", file_hash, storage_file_name(&file_name));
        self.storage.put(&file_key, &bytes).await?;
        debug!(file_key = %file_key, size = bytes.len(), "Stored tender file");

        let (tender, deduped) = self.tenders.create_unless_duplicate(
            NewTender {
                customer_id,
                source_type: TenderSource::File,
                original_text: text,
                file_name: Some(file_name),
                file_key: Some(file_key),
                file_hash: Some(file_hash),
                batch_id,
                created_by: actor.to_string(),
            },
            window,
        )?;
        Ok((tender, deduped))
    }

    /// Extract, classify and persist one run for `tender`.
    async fn run_pipeline(
        &self,
        tender: &Tender,
        profile: Option<&CustomerProfile>,
    ) -> Result<ExtractionRun, IntakeError> {
        let extraction = extract_candidates(
            &tender.original_text,
            &ExtractOptions {
                customer_profile: profile,
            },
        );
        metrics::CANDIDATES_EXTRACTED
            .with_label_values(&[])
            .observe(extraction.candidates.len() as f64);
        for applied in &extraction.metadata.applied_customer_rules.applied {
            metrics::RULES_APPLIED
                .with_label_values(&[applied.rule_type.as_str()])
                .inc();
        }
        self.emit(AuditEvent::ExtractionCompleted {
            tender_id: tender.id.clone(),
            candidates: extraction.candidates.len(),
            rules_applied: extraction.metadata.rules_applied_count,
            rules_skipped: extraction.metadata.rules_skipped_count,
        })
        .await;

        let mut run = NewExtractionRun {
            tender_id: tender.id.clone(),
            customer_id: tender.customer_id.clone(),
            candidates: extraction.candidates,
            metadata: extraction.metadata,
            ..Default::default()
        };

        if let Some(classifier) = &self.classifier {
            match self
                .classify(classifier, tender, &run.candidates, profile)
                .await
            {
                Ok(result) => {
                    run.llm_output = Some(result.shipment);
                    run.warnings = result.warnings;
                    run.provenance = result.provenance;
                    run.normalization = Some(result.normalization);
                    run.usage = Some(result.usage);
                }
                Err(failure) => {
                    run.error = Some(failure.error.to_string());
                    run.usage = Some(failure.usage);
                }
            }
        }

        Ok(self.tenders.append_run(run)?)
    }

    /// Classify with retry, recording metrics and audit events.
    async fn classify(
        &self,
        classifier: &ShipmentClassifier,
        tender: &Tender,
        candidates: &[Candidate],
        profile: Option<&CustomerProfile>,
    ) -> Result<ClassificationResult, ClassificationFailure> {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let original_text = tender.original_text.as_str();
        let source = tender.source_type;
        let started = Instant::now();

        let outcome = retry_with_backoff(
            &self.config.retry,
            |failure: &ClassificationFailure| failure.error.is_retryable(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                classifier.classify_and_verify(ClassificationInput {
                    original_text,
                    candidates,
                    customer_profile: profile,
                    source,
                })
            },
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        if attempts > 1 {
            metrics::RETRY_ATTEMPTS
                .with_label_values(&["classify"])
                .inc_by(u64::from(attempts - 1));
        }
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(result) => {
                metrics::CLASSIFICATION_DURATION
                    .with_label_values(&["success"])
                    .observe(elapsed);
                let usage = &result.usage;
                metrics::LLM_TOKENS
                    .with_label_values(&[usage.model.as_str(), "input"])
                    .inc_by(u64::from(usage.prompt_tokens));
                metrics::LLM_TOKENS
                    .with_label_values(&[usage.model.as_str(), "output"])
                    .inc_by(u64::from(usage.completion_tokens));

                let mut hallucinated = 0;
                let mut unverified = 0;
                for warning in &result.warnings {
                    let category = match warning.category() {
                        WarningCategory::Hallucinated => {
                            hallucinated += 1;
                            "hallucinated"
                        }
                        WarningCategory::Unverified => {
                            unverified += 1;
                            "unverified"
                        }
                    };
                    metrics::VERIFICATION_WARNINGS
                        .with_label_values(&[category])
                        .inc();
                }

                self.emit(AuditEvent::ClassificationCompleted {
                    tender_id: tender.id.clone(),
                    model: usage.model.clone(),
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                    duration_ms: usage.duration_ms,
                    attempts,
                })
                .await;
                let report = &result.normalization;
                self.emit(AuditEvent::VerificationSummary {
                    tender_id: tender.id.clone(),
                    warnings: result.warnings.len(),
                    hallucinated,
                    unverified,
                    refs_moved_to_stops: report.refs_moved_to_stops,
                    refs_deduplicated: report.refs_deduplicated,
                    stops_resequenced: report.stops_resequenced,
                    cargo_source: cargo_source_label(report.cargo_source).to_string(),
                })
                .await;
                Ok(result)
            }
            Err(e) => {
                metrics::CLASSIFICATION_DURATION
                    .with_label_values(&["failed"])
                    .observe(elapsed);
                warn!(
                    tender_id = %tender.id,
                    attempts = e.attempts,
                    exhausted = e.exhausted,
                    error = %e.last,
                    "Classification failed, keeping candidates only"
                );
                let failure = e.into_inner();
                let usage = &failure.usage;
                self.emit(AuditEvent::ClassificationFailed {
                    tender_id: tender.id.clone(),
                    model: usage.model.clone(),
                    error: failure.error.to_string(),
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                    duration_ms: usage.duration_ms,
                    attempts,
                })
                .await;
                Err(failure)
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_tender(&self, id: &str) -> Result<TenderDetail, IntakeError> {
        let tender = self.require_tender(id)?;
        let extraction = self.tenders.latest_run(id)?.map(Into::into);
        Ok(TenderDetail { tender, extraction })
    }

    pub fn list_tenders(&self, filter: &TenderFilter) -> Result<Vec<Tender>, IntakeError> {
        Ok(self.tenders.list_tenders(filter)?)
    }

    /// Time-limited URL for a tender's original file.
    pub fn file_url(&self, tender_id: &str) -> Result<SignedUrl, IntakeError> {
        let tender = self.require_tender(tender_id)?;
        let key = tender.file_key.ok_or_else(|| {
            IntakeError::InvalidInput(format!("tender {} has no stored file", tender_id))
        })?;
        Ok(self.storage.signed_url(&key, self.config.url_ttl)?)
    }

    // =========================================================================
    // Reprocess
    // =========================================================================

    /// Re-run the pipeline, optionally switching the customer first.
    ///
    /// `customer_id = None` keeps the tender's current customer. With an
    /// idempotency key, a repeated identical request returns the stored
    /// response without re-running.
    pub async fn reprocess(
        &self,
        tender_id: &str,
        customer_id: Option<&str>,
        actor: &str,
        idempotency_key: Option<&str>,
    ) -> Result<ReprocessOutcome, IntakeError> {
        let key = idempotency_key
            .map(|k| IdempotencyKey::new(k, actor, format!("reprocess:{}", tender_id)));

        if let Some(key) = &key {
            let body = serde_json::json!({ "customer_id": customer_id });
            match self
                .idempotency
                .begin(key, &fingerprint(body.to_string().as_bytes()))
            {
                IdempotencyOutcome::Fresh => {}
                IdempotencyOutcome::Replay(value) => {
                    let outcome: ReprocessOutcome = serde_json::from_value(value)
                        .map_err(|e| IntakeError::Internal(e.to_string()))?;
                    debug!(tender_id, "Replaying reprocess response");
                    self.emit(AuditEvent::TenderReprocessed {
                        tender_id: tender_id.to_string(),
                        user_id: actor.to_string(),
                        customer_id: outcome.tender.customer_id.clone(),
                        replayed: true,
                    })
                    .await;
                    return Ok(outcome);
                }
                IdempotencyOutcome::Conflict => return Err(IntakeError::IdempotencyConflict),
                IdempotencyOutcome::InFlight => return Err(IntakeError::RequestInFlight),
            }
        }

        let result = self.reprocess_locked(tender_id, customer_id, actor).await;

        if let Some(key) = &key {
            match result.as_ref().map(serde_json::to_value) {
                Ok(Ok(value)) => self.idempotency.complete(key, value),
                Ok(Err(e)) => {
                    warn!(tender_id, error = %e, "Could not cache reprocess response");
                    self.idempotency.abandon(key);
                }
                Err(_) => self.idempotency.abandon(key),
            }
        }
        result
    }

    async fn reprocess_locked(
        &self,
        tender_id: &str,
        customer_id: Option<&str>,
        actor: &str,
    ) -> Result<ReprocessOutcome, IntakeError> {
        let _guard = self.locks.acquire(tender_id, actor, "reprocess")?;

        let mut tender = self.require_tender(tender_id)?;
        let switch_to = customer_id.filter(|c| tender.customer_id.as_deref() != Some(*c));
        if let Some(customer_id) = switch_to {
            tender.customer_id = Some(customer_id.to_string());
        }
        let profile = self.load_profile(tender.customer_id.as_deref())?;

        // The customer switch is persisted only once the new run exists.
        let run = self.run_pipeline(&tender, profile.as_ref()).await?;
        if let Some(customer_id) = switch_to {
            tender = self.tenders.set_customer(tender_id, Some(customer_id))?;
        }
        info!(
            tender_id,
            customer_id = ?tender.customer_id,
            candidates = run.candidates.len(),
            "Tender reprocessed"
        );
        self.emit(AuditEvent::TenderReprocessed {
            tender_id: tender_id.to_string(),
            user_id: actor.to_string(),
            customer_id: tender.customer_id.clone(),
            replayed: false,
        })
        .await;

        Ok(ReprocessOutcome {
            tender,
            extraction: run.into(),
            customer: profile,
        })
    }

    // =========================================================================
    // Review
    // =========================================================================

    /// Save the reviewed shipment and learn from the differences against the
    /// latest classifier output.
    pub async fn save_final(
        &self,
        tender_id: &str,
        request: SaveFinal,
        actor: &str,
    ) -> Result<SaveFinalOutcome, IntakeError> {
        let _guard = self.locks.acquire(tender_id, actor, "save_final")?;

        let mut tender = self.require_tender(tender_id)?;
        let mut customer_changed = false;
        if let Some(customer_id) = request.customer_id.as_deref() {
            if tender.customer_id.as_deref() != Some(customer_id) {
                self.load_profile(Some(customer_id))?;
                tender = self.tenders.set_customer(tender_id, Some(customer_id))?;
                customer_changed = true;
            }
        }
        // Re-saving the stored final teaches nothing new.
        let resaved =
            !customer_changed && tender.final_shipment.as_ref() == Some(&request.shipment);

        let latest = self.tenders.latest_run(tender_id)?;
        let (suggested_rules, edits) = match latest
            .as_ref()
            .and_then(|run| run.llm_output.as_ref().map(|out| (run, out)))
        {
            Some((run, original)) => (
                detect_reclassifications(
                    original,
                    &request.shipment,
                    &run.candidates,
                    &tender.original_text,
                ),
                detect_all_edits(
                    original,
                    &request.shipment,
                    &run.candidates,
                    &tender.original_text,
                ),
            ),
            None => (Vec::new(), Vec::new()),
        };

        self.tenders
            .save_final(tender_id, &request.shipment, actor)?;

        let mut learning_events = 0;
        let mut learned_commodities = Vec::new();
        if let Some(customer_id) = tender.customer_id.as_deref().filter(|_| !resaved) {
            let events: Vec<LearningEvent> = edits
                .into_iter()
                .map(|edit| LearningEvent::from_edit(customer_id, tender_id, edit))
                .collect();
            self.tenders.record_learning_events(&events)?;
            learning_events = events.len();
            metrics::LEARNING_EVENTS.inc_by(events.len() as u64);

            let propose = request.apply_suggested_rules && !suggested_rules.is_empty();
            if propose || !events.is_empty() {
                let (_, (learned, proposals)) = self
                    .update_profile(customer_id, |profile| {
                        let learned = apply_commodity_learning(&mut profile.cargo_hints, &events);
                        let mut proposals = Vec::new();
                        if propose {
                            let now = Utc::now();
                            for suggestion in &suggested_rules {
                                if is_rule_already_learned(suggestion, &profile.rules) {
                                    continue;
                                }
                                let outcome = profile.propose_rule(
                                    suggestion.to_new_rule(Some(tender_id)),
                                    actor,
                                    now,
                                );
                                proposals.push((suggestion, outcome));
                            }
                        }
                        Ok((learned, proposals))
                    })
                    .await?;
                learned_commodities = learned;

                for (suggestion, outcome) in proposals {
                    metrics::RULES_PROPOSED
                        .with_label_values(&[if outcome.created { "created" } else { "reinforced" }])
                        .inc();
                    self.emit(AuditEvent::RuleProposed {
                        customer_id: customer_id.to_string(),
                        rule_id: outcome.rule_id,
                        rule_type: suggestion.rule_type.as_str().to_string(),
                        pattern: suggestion.pattern.clone(),
                        target_value: suggestion.target.as_str().to_string(),
                        created: outcome.created,
                        confidence: outcome.confidence,
                        user_id: actor.to_string(),
                    })
                    .await;
                }
            }
        }

        info!(
            tender_id,
            learning_events,
            suggested_rules = suggested_rules.len(),
            "Final shipment saved"
        );
        self.emit(AuditEvent::FinalShipmentSaved {
            tender_id: tender_id.to_string(),
            user_id: actor.to_string(),
            customer_id: tender.customer_id.clone(),
            learning_events,
            suggested_rules: suggested_rules.len(),
        })
        .await;

        Ok(SaveFinalOutcome {
            id: tender_id.to_string(),
            suggested_rules,
            learning_events,
            learned_commodities,
        })
    }

    /// Apply an admin action to a customer rule and return the updated rules.
    pub async fn rule_action(
        &self,
        customer_id: &str,
        rule_id: &str,
        action: RuleAction,
        identity: &Identity,
    ) -> Result<Vec<CustomerRule>, IntakeError> {
        identity.require_admin()?;

        let (profile, (from_status, to_status)) = self
            .update_profile(customer_id, |profile| {
                let from = profile
                    .rule(rule_id)
                    .map(|r| r.status)
                    .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))?;
                profile.apply_action(rule_id, action, &identity.user_id, Utc::now())?;
                Ok((from, profile.rule(rule_id).map(|r| r.status)))
            })
            .await?;

        info!(customer_id, rule_id, action = action.as_str(), "Rule status changed");
        self.emit(AuditEvent::RuleStatusChanged {
            customer_id: customer_id.to_string(),
            rule_id: rule_id.to_string(),
            action: action.as_str().to_string(),
            from_status: from_status.to_string(),
            to_status: to_status.map(|s| s.to_string()),
            user_id: identity.user_id.clone(),
        })
        .await;

        Ok(profile.rules)
    }

    /// Read-modify-write a customer profile, retrying when another writer
    /// saved in between.
    async fn update_profile<T, F>(
        &self,
        customer_id: &str,
        mut mutate: F,
    ) -> Result<(CustomerProfile, T), IntakeError>
    where
        F: FnMut(&mut CustomerProfile) -> Result<T, RuleError>,
    {
        let customers = self.customers.as_ref();
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(
            &self.config.retry,
            |e: &RuleError| matches!(e, RuleError::VersionConflict { .. }),
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                std::future::ready(try_update_profile(customers, customer_id, &mut mutate))
            },
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        if attempts > 1 {
            metrics::RETRY_ATTEMPTS
                .with_label_values(&["save_profile"])
                .inc_by(u64::from(attempts - 1));
        }

        result.map_err(|e| match e.into_inner() {
            RuleError::CustomerNotFound(id) => IntakeError::CustomerNotFound(id),
            other => IntakeError::Rules(other),
        })
    }

    // =========================================================================
    // Export
    // =========================================================================

    fn export_payload(&self, tender_id: &str) -> Result<ExportPayload, IntakeError> {
        let tender = self.require_tender(tender_id)?;
        let shipment = match tender.final_shipment {
            Some(shipment) => shipment,
            None => self
                .tenders
                .latest_run(tender_id)?
                .and_then(|run| run.llm_output)
                .ok_or_else(|| {
                    IntakeError::InvalidInput(format!(
                        "tender {} has no shipment to export",
                        tender_id
                    ))
                })?,
        };
        Ok(ExportPayload {
            tender_id: tender.id,
            customer_id: tender.customer_id,
            shipment,
        })
    }

    /// Map and validate the tender's shipment without sending it.
    pub async fn export_dry_run(
        &self,
        tender_id: &str,
        provider_id: &str,
        actor: &str,
    ) -> Result<DryRunReport, IntakeError> {
        let provider = self.exports.get(provider_id)?;
        let payload = self.export_payload(tender_id)?;
        let result = provider.dry_run(&payload).await;

        let (success, issues, error) = match &result {
            Ok(report) => (!report.has_errors(), report.issues.len(), None),
            Err(e) => (false, 0, Some(e.to_string())),
        };
        metrics::EXPORTS_TOTAL
            .with_label_values(&[provider_id, "dry_run", if success { "success" } else { "failed" }])
            .inc();
        self.emit(AuditEvent::ExportAttempted {
            tender_id: tender_id.to_string(),
            provider: provider_id.to_string(),
            user_id: actor.to_string(),
            dry_run: true,
            success,
            issues,
            error,
        })
        .await;

        Ok(result?)
    }

    /// Send the tender's shipment to a TMS.
    pub async fn export_tender(
        &self,
        tender_id: &str,
        provider_id: &str,
        actor: &str,
    ) -> Result<ExportReceipt, IntakeError> {
        let provider = self.exports.get(provider_id)?;
        let payload = self.export_payload(tender_id)?;

        let started = Instant::now();
        let result = provider.export(&payload).await;
        metrics::EXTERNAL_SERVICE_DURATION
            .with_label_values(&[provider_id, "export"])
            .observe(started.elapsed().as_secs_f64());

        let (issues, error) = match &result {
            Ok(receipt) => (receipt.warnings.len(), None),
            Err(ExportError::Validation(issues)) => {
                (issues.len(), Some("validation failed".to_string()))
            }
            Err(e) => (0, Some(e.to_string())),
        };
        match &result {
            Ok(receipt) => info!(tender_id, provider = provider_id, external_id = ?receipt.external_id, "Tender exported"),
            Err(e) => warn!(tender_id, provider = provider_id, error = %e, "Tender export failed"),
        }
        metrics::EXPORTS_TOTAL
            .with_label_values(&[provider_id, "live", if result.is_ok() { "success" } else { "failed" }])
            .inc();
        self.emit(AuditEvent::ExportAttempted {
            tender_id: tender_id.to_string(),
            provider: provider_id.to_string(),
            user_id: actor.to_string(),
            dry_run: false,
            success: result.is_ok(),
            issues,
            error,
        })
        .await;

        Ok(result?)
    }
}

fn try_update_profile<T, F>(
    customers: &dyn CustomerStore,
    customer_id: &str,
    mutate: &mut F,
) -> Result<(CustomerProfile, T), RuleError>
where
    F: FnMut(&mut CustomerProfile) -> Result<T, RuleError>,
{
    let mut profile = customers
        .get(customer_id)?
        .ok_or_else(|| RuleError::CustomerNotFound(customer_id.to_string()))?;
    let expected = profile.version;
    let value = mutate(&mut profile)?;
    let saved = customers.save(&profile, expected)?;
    Ok((saved, value))
}

fn cargo_source_label(source: CargoSource) -> &'static str {
    match source {
        CargoSource::Header => "header",
        CargoSource::Stop => "stop",
        CargoSource::Unknown => "unknown",
    }
}

/// File name reduced to characters that are safe in an object key.
fn storage_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
