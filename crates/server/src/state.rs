use std::sync::Arc;

use tenderdesk_core::{
    AuditStore, Authenticator, BatchProcessor, Config, SanitizedConfig, SlidingWindowLimiter,
    TenderService,
};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    audit_store: Arc<dyn AuditStore>,
    service: Arc<TenderService>,
    batches: BatchProcessor,
    limiter: SlidingWindowLimiter,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        audit_store: Arc<dyn AuditStore>,
        service: Arc<TenderService>,
        batches: BatchProcessor,
    ) -> Self {
        let limiter = SlidingWindowLimiter::from_config(&config.rate_limit);
        Self {
            config,
            authenticator,
            audit_store,
            service,
            batches,
            limiter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn service(&self) -> &TenderService {
        self.service.as_ref()
    }

    pub fn batches(&self) -> &BatchProcessor {
        &self.batches
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }
}
