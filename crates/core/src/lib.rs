pub mod audit;
pub mod auth;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod documents;
pub mod export;
pub mod extractor;
pub mod idempotency;
pub mod intake;
pub mod learning;
pub mod locks;
pub mod metrics;
pub mod ratelimit;
pub mod retry;
pub mod rules;
pub mod segmenter;
pub mod shipment;
pub mod storage;
pub mod tender;
pub mod testing;
pub(crate) mod text;
pub mod verifier;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator, Role,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use intake::{IntakeError, TenderService, TenderServiceConfig};

pub use audit::{
    create_audit_system, AuditEvent, AuditFilter, AuditHandle, AuditRecord, AuditStore,
    SqliteAuditStore,
};
pub use batch::{Batch, BatchError, BatchFile, BatchProcessor, BatchStore, SqliteBatchStore};
pub use classifier::ShipmentClassifier;
pub use export::{ExportError, ExportRegistry, McLeodProvider};
pub use locks::TenderLockError;
pub use ratelimit::{RateLimitKey, SlidingWindowLimiter};
pub use rules::{CreateCustomer, CustomerProfile, CustomerStore, RuleAction, RuleError, SqliteCustomerStore};
pub use storage::{FsObjectStorage, ObjectStorage};
pub use tender::{SqliteTenderStore, StoreError, TenderFilter, TenderStore};
