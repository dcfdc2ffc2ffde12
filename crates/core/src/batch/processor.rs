//! Single-worker sequential batch processing.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::intake::{CreateTender, TenderInput, TenderService};
use crate::metrics;

use super::{Batch, BatchError, BatchFile, BatchStatus, BatchStore, ItemUpdate, NewBatch};

struct BatchJob {
    batch_id: String,
    customer_id: Option<String>,
    actor: String,
    /// (item id, file) in submission order.
    items: Vec<(String, BatchFile)>,
}

/// Queues batches for one background worker.
///
/// Items run strictly in submission order, one at a time, across all
/// batches. A failed item is recorded and the worker moves on to the next.
#[derive(Clone)]
pub struct BatchProcessor {
    store: Arc<dyn BatchStore>,
    tx: mpsc::Sender<BatchJob>,
    audit: Option<AuditHandle>,
}

impl BatchProcessor {
    /// Spawn the worker. It stops once every `BatchProcessor` clone is dropped
    /// and the queue is drained.
    pub fn start(
        service: Arc<TenderService>,
        store: Arc<dyn BatchStore>,
        audit: Option<AuditHandle>,
        queue_size: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let worker = BatchWorker {
            service,
            store: Arc::clone(&store),
            audit: audit.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { store, tx, audit }, handle)
    }

    /// Record a batch and enqueue its files.
    pub async fn submit(
        &self,
        files: Vec<BatchFile>,
        customer_id: Option<String>,
        actor: &str,
    ) -> Result<Batch, BatchError> {
        if files.is_empty() {
            return Err(BatchError::Empty);
        }

        let batch = self.store.create_batch(NewBatch {
            customer_id: customer_id.clone(),
            created_by: actor.to_string(),
            file_names: files.iter().map(|f| f.file_name.clone()).collect(),
        })?;

        let items = batch
            .items
            .iter()
            .map(|item| item.id.clone())
            .zip(files)
            .collect();

        info!(batch_id = %batch.id, items = batch.items.len(), "Batch queued");
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::BatchCreated {
                    batch_id: batch.id.clone(),
                    user_id: actor.to_string(),
                    customer_id: customer_id.clone(),
                    items: batch.items.len(),
                })
                .await;
        }

        self.tx
            .send(BatchJob {
                batch_id: batch.id.clone(),
                customer_id,
                actor: actor.to_string(),
                items,
            })
            .await
            .map_err(|_| BatchError::QueueClosed)?;

        Ok(batch)
    }

    pub fn get(&self, batch_id: &str) -> Result<Batch, BatchError> {
        self.store
            .get_batch(batch_id)?
            .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))
    }
}

struct BatchWorker {
    service: Arc<TenderService>,
    store: Arc<dyn BatchStore>,
    audit: Option<AuditHandle>,
}

impl BatchWorker {
    async fn run(self, mut rx: mpsc::Receiver<BatchJob>) {
        debug!("Batch worker started");
        while let Some(job) = rx.recv().await {
            self.process(job).await;
        }
        debug!("Batch worker stopped");
    }

    async fn process(&self, job: BatchJob) {
        if let Err(e) = self.store.set_status(&job.batch_id, BatchStatus::Processing) {
            error!(batch_id = %job.batch_id, error = %e, "Failed to mark batch processing");
        }

        let mut failed = 0usize;
        for (item_id, file) in job.items {
            if let Err(e) = self.store.update_item(&item_id, ItemUpdate::Processing) {
                warn!(item_id = %item_id, error = %e, "Failed to mark batch item processing");
            }

            let file_name = file.file_name.clone();
            let result = self
                .service
                .create_tender(
                    CreateTender {
                        customer_id: job.customer_id.clone(),
                        input: TenderInput::File {
                            file_name: file.file_name,
                            bytes: file.bytes,
                        },
                        batch_id: Some(job.batch_id.clone()),
                    },
                    &job.actor,
                )
                .await;

            let update = match result {
                Ok(outcome) => {
                    metrics::BATCH_ITEMS.with_label_values(&["completed"]).inc();
                    debug!(batch_id = %job.batch_id, item_id = %item_id, tender_id = %outcome.id, "Batch item completed");
                    ItemUpdate::Completed {
                        tender_id: outcome.id,
                        deduped: outcome.deduped,
                    }
                }
                Err(e) => {
                    failed += 1;
                    metrics::BATCH_ITEMS.with_label_values(&["failed"]).inc();
                    warn!(batch_id = %job.batch_id, file_name = %file_name, error = %e, "Batch item failed");
                    if let Some(ref audit) = self.audit {
                        audit
                            .emit(AuditEvent::BatchItemFailed {
                                batch_id: job.batch_id.clone(),
                                item_id: item_id.clone(),
                                file_name: file_name.clone(),
                                error: e.to_string(),
                            })
                            .await;
                    }
                    ItemUpdate::Failed {
                        error: e.to_string(),
                    }
                }
            };

            if let Err(e) = self.store.update_item(&item_id, update) {
                error!(item_id = %item_id, error = %e, "Failed to record batch item result");
            }
        }

        let status = if failed == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::CompletedWithErrors
        };
        if let Err(e) = self.store.set_status(&job.batch_id, status) {
            error!(batch_id = %job.batch_id, error = %e, "Failed to finish batch");
        }
        info!(batch_id = %job.batch_id, failed, "Batch finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchItemStatus, SqliteBatchStore};
    use crate::intake::TenderServiceConfig;
    use crate::rules::SqliteCustomerStore;
    use crate::storage::FsObjectStorage;
    use crate::tender::SqliteTenderStore;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn wait_until_finished(processor: &BatchProcessor, id: &str) -> Batch {
        for _ in 0..200 {
            let batch = processor.get(id).unwrap();
            if matches!(
                batch.status,
                BatchStatus::Completed | BatchStatus::CompletedWithErrors
            ) {
                return batch;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch {} did not finish", id);
    }

    #[tokio::test]
    async fn test_failed_item_does_not_stop_siblings() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(TenderService::new(
            Arc::new(SqliteTenderStore::in_memory().unwrap()),
            Arc::new(SqliteCustomerStore::in_memory().unwrap()),
            Arc::new(FsObjectStorage::new(dir.path(), "http://localhost", "s")),
            TenderServiceConfig::default(),
        ));
        let (processor, _worker) = BatchProcessor::start(
            service,
            Arc::new(SqliteBatchStore::in_memory().unwrap()),
            None,
            8,
        );

        let files = vec![
            BatchFile {
                file_name: "first.txt".to_string(),
                bytes: b"PO# 111111\nPickup: Dallas, TX 75201".to_vec(),
            },
            BatchFile {
                file_name: "blank.txt".to_string(),
                bytes: b"   ".to_vec(),
            },
            BatchFile {
                file_name: "third.txt".to_string(),
                bytes: b"BOL 222222\nDelivery: Chicago, IL 60601".to_vec(),
            },
        ];
        let batch = processor.submit(files, None, "alice").await.unwrap();
        assert_eq!(batch.status, BatchStatus::Queued);

        let done = wait_until_finished(&processor, &batch.id).await;
        assert_eq!(done.status, BatchStatus::CompletedWithErrors);
        let statuses: Vec<_> = done.items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![
                BatchItemStatus::Completed,
                BatchItemStatus::Failed,
                BatchItemStatus::Completed
            ]
        );
        assert!(done.items[1].error.is_some());
        assert!(done.items[2].tender_id.is_some());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(TenderService::new(
            Arc::new(SqliteTenderStore::in_memory().unwrap()),
            Arc::new(SqliteCustomerStore::in_memory().unwrap()),
            Arc::new(FsObjectStorage::new(dir.path(), "http://localhost", "s")),
            TenderServiceConfig::default(),
        ));
        let (processor, _worker) = BatchProcessor::start(
            service,
            Arc::new(SqliteBatchStore::in_memory().unwrap()),
            None,
            1,
        );
        assert_eq!(
            processor.submit(Vec::new(), None, "alice").await.unwrap_err(),
            BatchError::Empty
        );
    }
}
