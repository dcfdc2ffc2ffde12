//! Mapping from domain errors to HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tenderdesk_core::audit::AuditError;
use tenderdesk_core::ratelimit::RateLimitExceededError;
use tenderdesk_core::storage::StorageError;
use tenderdesk_core::{
    AuthError, BatchError, ExportError, IntakeError, RuleError, StoreError, TenderLockError,
};
use tracing::error;

/// Every handler error funnels through here so status codes stay consistent.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    RateLimited(RateLimitExceededError),
    Intake(IntakeError),
    Batch(BatchError),
    Audit(AuditError),
    BadRequest(String),
    NotFound(String),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

impl From<RateLimitExceededError> for ApiError {
    fn from(e: RateLimitExceededError) -> Self {
        Self::RateLimited(e)
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        Self::Intake(e)
    }
}

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        Self::Intake(IntakeError::Rules(e))
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        Self::Batch(e)
    }
}

impl From<AuditError> for ApiError {
    fn from(e: AuditError) -> Self {
        Self::Audit(e)
    }
}

fn body(status: StatusCode, value: Value) -> Response {
    (status, Json(value)).into_response()
}

fn simple(status: StatusCode, code: &str, message: impl ToString) -> Response {
    body(
        status,
        json!({ "error": code, "message": message.to_string() }),
    )
}

fn internal(detail: impl std::fmt::Display) -> Response {
    error!(error = %detail, "Request failed");
    body(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "internal_error" }),
    )
}

fn auth_response(e: AuthError) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
    match e {
        AuthError::NotAuthenticated | AuthError::InvalidCredentials(_) => {
            simple(status, "unauthorized", e)
        }
        AuthError::Forbidden(_) => simple(status, "forbidden", e),
        AuthError::ServiceUnavailable(_) | AuthError::ConfigurationError(_) => {
            error!(error = %e, "Authentication backend failed");
            body(status, json!({ "error": "auth_unavailable" }))
        }
    }
}

fn locked_response(e: TenderLockError) -> Response {
    body(
        StatusCode::CONFLICT,
        json!({
            "error": "tender_locked",
            "tender_id": e.tender_id,
            "holder": e.holder,
            "reason": e.reason,
            "acquired_at": e.acquired_at,
        }),
    )
}

fn rule_response(e: RuleError) -> Response {
    match e {
        RuleError::CustomerNotFound(_) | RuleError::RuleNotFound(_) => {
            simple(StatusCode::NOT_FOUND, "not_found", e)
        }
        RuleError::InvalidStateTransition {
            rule_id,
            current,
            target,
        } => body(
            StatusCode::CONFLICT,
            json!({
                "error": "invalid_state_transition",
                "rule_id": rule_id,
                "current": current,
                "target": target,
            }),
        ),
        RuleError::VersionConflict { .. } => simple(StatusCode::CONFLICT, "version_conflict", e),
        RuleError::InvalidRule(_) => simple(StatusCode::BAD_REQUEST, "invalid_rule", e),
        RuleError::Database(_) => internal(e),
    }
}

fn export_response(e: ExportError) -> Response {
    match e {
        ExportError::UnknownProvider(_) => simple(StatusCode::NOT_FOUND, "unknown_provider", e),
        ExportError::NotConfigured(_) => {
            simple(StatusCode::SERVICE_UNAVAILABLE, "provider_not_configured", e)
        }
        ExportError::Validation(issues) => body(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": "export_validation_failed", "issues": issues }),
        ),
        ExportError::Http(_) | ExportError::Rejected { .. } => {
            simple(StatusCode::BAD_GATEWAY, "export_failed", e)
        }
    }
}

fn intake_response(e: IntakeError) -> Response {
    match e {
        IntakeError::TenderNotFound(_) | IntakeError::CustomerNotFound(_) => {
            simple(StatusCode::NOT_FOUND, "not_found", e)
        }
        IntakeError::InvalidInput(_) => simple(StatusCode::BAD_REQUEST, "invalid_request", e),
        IntakeError::IdempotencyConflict => body(
            StatusCode::CONFLICT,
            json!({ "error": "idempotency_conflict" }),
        ),
        IntakeError::RequestInFlight => simple(StatusCode::CONFLICT, "request_in_flight", e),
        IntakeError::Locked(lock) => locked_response(lock),
        IntakeError::Auth(auth) => auth_response(auth),
        IntakeError::Rules(rule) => rule_response(rule),
        IntakeError::Store(StoreError::NotFound(_)) => {
            simple(StatusCode::NOT_FOUND, "not_found", e)
        }
        IntakeError::Document(_) => {
            simple(StatusCode::UNPROCESSABLE_ENTITY, "unreadable_document", e)
        }
        IntakeError::Storage(StorageError::NotFound(_)) => {
            simple(StatusCode::NOT_FOUND, "not_found", e)
        }
        IntakeError::Storage(StorageError::InvalidKey(_)) => {
            simple(StatusCode::BAD_REQUEST, "invalid_key", e)
        }
        IntakeError::Export(export) => export_response(export),
        IntakeError::Store(_) | IntakeError::Storage(_) | IntakeError::Internal(_) => internal(e),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(e) => auth_response(e),
            ApiError::RateLimited(e) => {
                let mut response = body(
                    StatusCode::TOO_MANY_REQUESTS,
                    json!({
                        "error": "rate_limited",
                        "retry_after_secs": e.retry_after_secs,
                    }),
                );
                if let Ok(value) = HeaderValue::from_str(&e.retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            ApiError::Intake(e) => intake_response(e),
            ApiError::Batch(e) => match e {
                BatchError::NotFound(_) | BatchError::ItemNotFound(_) => {
                    simple(StatusCode::NOT_FOUND, "not_found", e)
                }
                BatchError::Empty => simple(StatusCode::BAD_REQUEST, "invalid_request", e),
                BatchError::QueueClosed => {
                    simple(StatusCode::SERVICE_UNAVAILABLE, "queue_closed", e)
                }
                BatchError::Database(_) => internal(e),
            },
            ApiError::Audit(e) => internal(e),
            ApiError::BadRequest(message) => {
                simple(StatusCode::BAD_REQUEST, "invalid_request", message)
            }
            ApiError::NotFound(message) => simple(StatusCode::NOT_FOUND, "not_found", message),
        }
    }
}
