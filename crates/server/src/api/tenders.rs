//! Tender API handlers.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenderdesk_core::export::{DryRunReport, ExportReceipt};
use tenderdesk_core::intake::{
    CreateTender, CreateTenderOutcome, ReprocessOutcome, SaveFinal, SaveFinalOutcome,
    TenderDetail, TenderInput,
};
use tenderdesk_core::storage::SignedUrl;
use tenderdesk_core::tender::Tender;
use tenderdesk_core::TenderFilter;

use super::error::ApiError;
use super::middleware::CurrentIdentity;
use crate::state::AppState;

/// Maximum allowed limit for tender listings
const MAX_LIMIT: i64 = 1000;

/// Default limit for tender listings
const DEFAULT_LIMIT: i64 = 100;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Request body for pasting tender text
#[derive(Debug, Deserialize)]
pub struct CreateTenderBody {
    pub text: String,
    pub customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTendersParams {
    pub customer_id: Option<String>,
    pub batch_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListTendersResponse {
    pub tenders: Vec<Tender>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReprocessBody {
    pub customer_id: Option<String>,
}

/// Create a tender from pasted text
pub async fn create_tender(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(body): Json<CreateTenderBody>,
) -> Result<(StatusCode, Json<CreateTenderOutcome>), ApiError> {
    let outcome = state
        .service()
        .create_tender(
            CreateTender {
                customer_id: body.customer_id,
                input: TenderInput::Text(body.text),
                batch_id: None,
            },
            &identity.user_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// An uploaded file plus the optional `customer_id` form field.
pub(crate) struct UploadForm {
    pub files: Vec<(String, Vec<u8>)>,
    pub customer_id: Option<String>,
}

/// Collect `file` parts and the `customer_id` field from a multipart body.
pub(crate) async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm {
        files: Vec::new(),
        customer_id: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("customer_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                let value = value.trim();
                if !value.is_empty() {
                    form.customer_id = Some(value.to_string());
                }
            }
            Some("file") | Some("files") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                form.files.push((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Create a tender from an uploaded document
pub async fn upload_tender(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreateTenderOutcome>), ApiError> {
    let form = read_upload_form(multipart).await?;
    let mut files = form.files.into_iter();
    let (file_name, bytes) = files
        .next()
        .ok_or_else(|| ApiError::BadRequest("missing file field".to_string()))?;
    if files.next().is_some() {
        return Err(ApiError::BadRequest(
            "upload one file at a time, or use /batches".to_string(),
        ));
    }

    let outcome = state
        .service()
        .create_tender(
            CreateTender {
                customer_id: form.customer_id,
                input: TenderInput::File { file_name, bytes },
                batch_id: None,
            },
            &identity.user_id,
        )
        .await?;

    let status = if outcome.deduped {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// List tenders, newest first
pub async fn list_tenders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTendersParams>,
) -> Result<Json<ListTendersResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let tenders = state.service().list_tenders(&TenderFilter {
        customer_id: params.customer_id,
        batch_id: params.batch_id,
        limit,
        offset,
    })?;

    Ok(Json(ListTendersResponse {
        tenders,
        limit,
        offset,
    }))
}

pub async fn get_tender(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TenderDetail>, ApiError> {
    Ok(Json(state.service().get_tender(&id)?))
}

/// Re-run extraction and classification.
///
/// The body is optional; an empty body keeps the current customer.
pub async fn reprocess_tender(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReprocessOutcome>, ApiError> {
    let body: ReprocessBody = if body.iter().all(u8::is_ascii_whitespace) {
        ReprocessBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?
    };

    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| ApiError::BadRequest("Idempotency-Key must be ASCII".to_string()))
        })
        .transpose()?
        .filter(|k| !k.is_empty());

    let outcome = state
        .service()
        .reprocess(
            &id,
            body.customer_id.as_deref(),
            &identity.user_id,
            idempotency_key,
        )
        .await?;
    Ok(Json(outcome))
}

/// Save the reviewed shipment and learn from the edits
pub async fn save_final(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(id): Path<String>,
    Json(body): Json<SaveFinal>,
) -> Result<Json<SaveFinalOutcome>, ApiError> {
    Ok(Json(
        state
            .service()
            .save_final(&id, body, &identity.user_id)
            .await?,
    ))
}

pub async fn file_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SignedUrl>, ApiError> {
    Ok(Json(state.service().file_url(&id)?))
}

pub async fn export_dry_run(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path((id, provider)): Path<(String, String)>,
) -> Result<Json<DryRunReport>, ApiError> {
    Ok(Json(
        state
            .service()
            .export_dry_run(&id, &provider, &identity.user_id)
            .await?,
    ))
}

pub async fn export_tender(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path((id, provider)): Path<(String, String)>,
) -> Result<Json<ExportReceipt>, ApiError> {
    Ok(Json(
        state
            .service()
            .export_tender(&id, &provider, &identity.user_id)
            .await?,
    ))
}
