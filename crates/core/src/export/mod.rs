//! Export of reviewed shipments to downstream TMS systems.
//!
//! Each target is an [`ExportProvider`] registered in an [`ExportRegistry`]
//! under its id. A dry run validates and maps without side effects; a live
//! export refuses to send while the dry run reports errors.

mod mcleod;

pub use mcleod::{McLeodConfig, McLeodProvider};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::shipment::StructuredShipment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// One problem found while validating an export payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: IssueSeverity,
}

impl ValidationIssue {
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: IssueSeverity::Error,
        }
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: IssueSeverity::Warning,
        }
    }
}

/// Canonical input handed to every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPayload {
    pub tender_id: String,
    pub customer_id: Option<String>,
    pub shipment: StructuredShipment,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DryRunReport {
    pub provider: String,
    /// The provider-specific document that a live export would send.
    pub mapped: Value,
    pub issues: Vec<ValidationIssue>,
}

impl DryRunReport {
    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExportReceipt {
    pub provider: String,
    /// Identifier assigned by the remote system.
    pub external_id: Option<String>,
    pub warnings: Vec<ValidationIssue>,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unknown export provider: {0}")]
    UnknownProvider(String),

    #[error("Export provider {0} is not configured")]
    NotConfigured(String),

    #[error("Export payload failed validation ({} issue(s))", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("Export request failed: {0}")]
    Http(String),

    #[error("Export rejected by remote ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[async_trait]
pub trait ExportProvider: Send + Sync {
    fn id(&self) -> &str;

    fn is_configured(&self) -> bool;

    /// Validate and map without contacting the remote system.
    async fn dry_run(&self, payload: &ExportPayload) -> Result<DryRunReport, ExportError>;

    async fn export(&self, payload: &ExportPayload) -> Result<ExportReceipt, ExportError>;
}

/// Providers keyed by id.
#[derive(Default, Clone)]
pub struct ExportRegistry {
    providers: BTreeMap<String, Arc<dyn ExportProvider>>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ExportProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn ExportProvider>, ExportError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ExportError::UnknownProvider(id.to_string()))
    }

    /// Registered provider ids with their configured flag.
    pub fn list(&self) -> Vec<(String, bool)> {
        self.providers
            .iter()
            .map(|(id, p)| (id.clone(), p.is_configured()))
            .collect()
    }
}
