//! Customer profile and rule handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenderdesk_core::rules::CustomerRule;
use tenderdesk_core::{CreateCustomer, CustomerProfile, RuleAction, RuleError};
use tracing::info;

use super::error::ApiError;
use super::middleware::CurrentIdentity;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCustomerBody {
    pub id: Option<String>,
    pub name: String,
    pub prompt_notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListCustomersResponse {
    pub customers: Vec<CustomerProfile>,
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub customer_id: String,
    pub rules: Vec<CustomerRule>,
}

#[derive(Debug, Deserialize)]
pub struct RuleActionBody {
    pub rule_id: String,
    pub action: RuleAction,
}

pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(body): Json<CreateCustomerBody>,
) -> Result<(StatusCode, Json<CustomerProfile>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("customer name is empty".to_string()));
    }

    let profile = state.service().customers().create(CreateCustomer {
        id: body.id,
        name: body.name,
        prompt_notes: body.prompt_notes,
    })?;
    info!(customer_id = %profile.id, user = %identity.user_id, "Customer created");
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn list_customers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListCustomersResponse>, ApiError> {
    Ok(Json(ListCustomersResponse {
        customers: state.service().customers().list()?,
    }))
}

fn load(state: &AppState, id: &str) -> Result<CustomerProfile, ApiError> {
    state
        .service()
        .customers()
        .get(id)?
        .ok_or_else(|| RuleError::CustomerNotFound(id.to_string()).into())
}

pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CustomerProfile>, ApiError> {
    Ok(Json(load(&state, &id)?))
}

pub async fn get_rules(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RulesResponse>, ApiError> {
    let profile = load(&state, &id)?;
    Ok(Json(RulesResponse {
        customer_id: profile.id,
        rules: profile.rules,
    }))
}

/// Approve, deprecate, reactivate or delete a rule (admin only)
pub async fn rule_action(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(id): Path<String>,
    Json(body): Json<RuleActionBody>,
) -> Result<Json<RulesResponse>, ApiError> {
    let rules = state
        .service()
        .rule_action(&id, &body.rule_id, body.action, &identity)
        .await?;
    Ok(Json(RulesResponse {
        customer_id: id,
        rules,
    }))
}
