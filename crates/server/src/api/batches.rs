//! Batch upload handlers.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tenderdesk_core::{Batch, BatchFile, RuleError};

use super::error::ApiError;
use super::middleware::CurrentIdentity;
use super::tenders::read_upload_form;
use crate::state::AppState;

/// Queue every uploaded file for sequential processing.
///
/// Returns as soon as the batch is recorded; poll `GET /batches/{id}` for
/// per-item progress.
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Batch>), ApiError> {
    let form = read_upload_form(multipart).await?;

    // Fail fast instead of letting every item fail on an unknown customer.
    if let Some(ref customer_id) = form.customer_id {
        if state.service().customers().get(customer_id)?.is_none() {
            return Err(RuleError::CustomerNotFound(customer_id.clone()).into());
        }
    }

    let files = form
        .files
        .into_iter()
        .map(|(file_name, bytes)| BatchFile { file_name, bytes })
        .collect();

    let batch = state
        .batches()
        .submit(files, form.customer_id, &identity.user_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(batch)))
}

pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Batch>, ApiError> {
    Ok(Json(state.batches().get(&id)?))
}
