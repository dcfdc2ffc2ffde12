//! Signed download links for stored originals.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tenderdesk_core::storage::verify_signature;
use tenderdesk_core::{AuthError, IntakeError};
use tracing::debug;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignatureParams {
    pub expires: i64,
    pub signature: String,
}

fn content_type_for(key: &str) -> &'static str {
    let lower = key.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        "application/pdf"
    } else if lower.ends_with(".docx") {
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    } else if lower.ends_with(".eml") {
        "message/rfc822"
    } else if lower.ends_with(".txt") {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

/// Serve a stored file when the URL signature is valid and unexpired.
///
/// The signature is the credential here, so this route sits outside the
/// API key check.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<SignatureParams>,
) -> Result<impl IntoResponse, ApiError> {
    let secret = &state.config().storage.signing_secret;
    if !verify_signature(
        secret,
        &key,
        params.expires,
        &params.signature,
        Utc::now().timestamp(),
    ) {
        debug!(key = %key, "Rejected file download with bad or expired signature");
        return Err(AuthError::Forbidden("invalid or expired file signature".to_string()).into());
    }

    let bytes = state
        .service()
        .storage()
        .get(&key)
        .await
        .map_err(IntakeError::from)?;

    let file_name = key.rsplit('/').next().unwrap_or("download").replace('"', "");
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&key).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    ))
}
