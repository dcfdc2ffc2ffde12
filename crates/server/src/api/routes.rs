use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::middleware::{auth_middleware, metrics_middleware, rate_limit_middleware};
use super::{audit, batches, customers, files, handlers, tenders};
use crate::state::AppState;

/// Multipart framing allowance on top of the configured file size.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Files accepted in one batch request, at the configured size each.
const MAX_BATCH_FILES: usize = 25;

pub fn create_router(state: Arc<AppState>) -> Router {
    let max_upload = state.config().intake.max_upload_bytes;
    let upload_limit = DefaultBodyLimit::max(max_upload.saturating_add(MULTIPART_OVERHEAD));
    let batch_limit = DefaultBodyLimit::max(
        max_upload
            .saturating_mul(MAX_BATCH_FILES)
            .saturating_add(MULTIPART_OVERHEAD),
    );

    // Authenticated and rate limited
    let protected = Router::new()
        .route("/config", get(handlers::get_config))
        .route("/audit", get(audit::query_audit))
        // Tenders
        .route(
            "/tenders",
            post(tenders::create_tender).get(tenders::list_tenders),
        )
        .route(
            "/tenders/upload",
            post(tenders::upload_tender).layer(upload_limit),
        )
        .route("/tenders/{id}", get(tenders::get_tender))
        .route("/tenders/{id}/reprocess", post(tenders::reprocess_tender))
        .route("/tenders/{id}/final", post(tenders::save_final))
        .route("/tenders/{id}/file-url", get(tenders::file_url))
        .route(
            "/tenders/{id}/export/{provider}/dry-run",
            post(tenders::export_dry_run),
        )
        .route("/tenders/{id}/export/{provider}", post(tenders::export_tender))
        // Batches
        .route("/batches", post(batches::create_batch).layer(batch_limit))
        .route("/batches/{id}", get(batches::get_batch))
        // Customers and rules
        .route(
            "/customers",
            post(customers::create_customer).get(customers::list_customers),
        )
        .route("/customers/{id}", get(customers::get_customer))
        .route("/customers/{id}/rules", get(customers::get_rules))
        .route("/customers/{id}/rules/action", post(customers::rule_action))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Signed file links carry their own credential
    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/files/{*key}", get(files::get_file));

    let api_routes = public.merge(protected).with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
