use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenderdesk_core::{
    create_audit_system, create_authenticator, load_config, validate_config, AuditEvent,
    AuditStore, Authenticator, BatchProcessor, BatchStore, CustomerStore, ExportRegistry,
    FsObjectStorage, McLeodProvider, ObjectStorage, SqliteAuditStore, SqliteBatchStore,
    SqliteCustomerStore, SqliteTenderStore, TenderService, TenderServiceConfig, TenderStore,
};
use tenderdesk_server::api::create_router;
use tenderdesk_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// Batches waiting for the worker before `POST /batches` blocks.
const BATCH_QUEUE_SIZE: usize = 64;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("TENDERDESK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Auth method: {:?}", config.auth.method);
    info!("Database path: {:?}", config.database.path);

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = hex::encode(Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    let tender_store: Arc<dyn TenderStore> = Arc::new(
        SqliteTenderStore::new(&config.database.path).context("Failed to create tender store")?,
    );
    let customer_store: Arc<dyn CustomerStore> = Arc::new(
        SqliteCustomerStore::new(&config.database.path)
            .context("Failed to create customer store")?,
    );
    let batch_store: Arc<dyn BatchStore> = Arc::new(
        SqliteBatchStore::new(&config.database.path).context("Failed to create batch store")?,
    );
    info!("Stores initialized");

    let storage: Arc<dyn ObjectStorage> = Arc::new(FsObjectStorage::from_config(&config.storage));
    info!("Object storage rooted at {:?}", config.storage.root);

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let mut exports = ExportRegistry::new();
    match &config.export.mcleod {
        Some(mcleod) => {
            info!("Registering McLeod export provider at {}", mcleod.base_url);
            exports.register(Arc::new(McLeodProvider::new(mcleod.clone())));
        }
        None => info!("No export providers configured"),
    }

    let mut service = TenderService::new(
        tender_store,
        customer_store,
        storage,
        TenderServiceConfig::from_config(&config),
    )
    .with_audit(audit_handle.clone())
    .with_exports(exports);

    match &config.classifier {
        Some(classifier_config) => {
            info!(
                "Initializing {:?} classifier (model: {})",
                classifier_config.provider, classifier_config.model
            );
            service = service.with_classifier(Arc::new(classifier_config.build_classifier()));
        }
        None => info!("No classifier configured, tenders will carry candidates only"),
    }
    let service = Arc::new(service);

    let (batches, batch_worker) = BatchProcessor::start(
        Arc::clone(&service),
        batch_store,
        Some(audit_handle.clone()),
        BATCH_QUEUE_SIZE,
    );
    info!("Batch worker started");

    let state = Arc::new(AppState::new(
        config.clone(),
        authenticator,
        audit_store,
        service,
        batches,
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // The router (and with it AppState's BatchProcessor) is gone once serve
    // returns, so the worker drains what is already queued and exits.
    info!("Waiting for batch worker to drain...");
    let _ = batch_worker.await;

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // Emit the final event before dropping the last handle so the writer's
    // channel closes after it.
    drop(audit_handle);

    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
