use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BatchError {
    #[error("Batch not found: {0}")]
    NotFound(String),

    #[error("Batch item not found: {0}")]
    ItemNotFound(String),

    #[error("A batch needs at least one file")]
    Empty,

    #[error("Batch queue is closed")]
    QueueClosed,

    #[error("Database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    /// Finished, but at least one item failed.
    CompletedWithErrors,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::CompletedWithErrors => "completed_with_errors",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(BatchStatus::Queued),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "completed_with_errors" => Some(BatchStatus::CompletedWithErrors),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl BatchItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchItemStatus::Queued => "queued",
            BatchItemStatus::Processing => "processing",
            BatchItemStatus::Completed => "completed",
            BatchItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(BatchItemStatus::Queued),
            "processing" => Some(BatchItemStatus::Processing),
            "completed" => Some(BatchItemStatus::Completed),
            "failed" => Some(BatchItemStatus::Failed),
            _ => None,
        }
    }
}

/// One file of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItem {
    pub id: String,
    pub batch_id: String,
    /// Zero-based submission order.
    pub position: usize,
    pub file_name: String,
    pub status: BatchItemStatus,
    pub tender_id: Option<String>,
    pub deduped: bool,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: String,
    pub customer_id: Option<String>,
    pub created_by: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// In submission order.
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == BatchItemStatus::Failed)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct NewBatch {
    pub customer_id: Option<String>,
    pub created_by: String,
    pub file_names: Vec<String>,
}

/// Result of processing one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemUpdate {
    Processing,
    Completed { tender_id: String, deduped: bool },
    Failed { error: String },
}

/// An uploaded file waiting in a batch.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
