//! SQLite-backed batch store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Batch, BatchError, BatchItem, BatchItemStatus, BatchStatus, BatchStore, ItemUpdate, NewBatch};

fn db_err(e: impl ToString) -> BatchError {
    BatchError::Database(e.to_string())
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn bad_column(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown status {}", value).into(),
    )
}

pub struct SqliteBatchStore {
    conn: Mutex<Connection>,
}

impl SqliteBatchStore {
    pub fn new(path: &Path) -> Result<Self, BatchError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, BatchError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), BatchError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                customer_id TEXT,
                created_by TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS batch_items (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL REFERENCES batches(id),
                position INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                status TEXT NOT NULL,
                tender_id TEXT,
                deduped INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_batch_items_batch ON batch_items(batch_id, position);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, BatchError> {
        self.conn.lock().map_err(|_| db_err("connection mutex poisoned"))
    }

    fn load_items(conn: &Connection, batch_id: &str) -> Result<Vec<BatchItem>, BatchError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, batch_id, position, file_name, status, tender_id, deduped, error, updated_at
                 FROM batch_items WHERE batch_id = ? ORDER BY position",
            )
            .map_err(db_err)?;
        let items = stmt
            .query_map(params![batch_id], |row| {
                let status: String = row.get(4)?;
                let position: i64 = row.get(2)?;
                let updated_at: String = row.get(8)?;
                Ok(BatchItem {
                    id: row.get(0)?,
                    batch_id: row.get(1)?,
                    position: position as usize,
                    file_name: row.get(3)?,
                    status: BatchItemStatus::parse(&status).ok_or_else(|| bad_column(4, &status))?,
                    tender_id: row.get(5)?,
                    deduped: row.get(6)?,
                    error: row.get(7)?,
                    updated_at: parse_ts(&updated_at),
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(items)
    }
}

impl BatchStore for SqliteBatchStore {
    fn create_batch(&self, batch: NewBatch) -> Result<Batch, BatchError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let now = ts(Utc::now());
        let id = uuid::Uuid::new_v4().to_string();

        tx.execute(
            "INSERT INTO batches (id, customer_id, created_by, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id,
                batch.customer_id,
                batch.created_by,
                BatchStatus::Queued.as_str(),
                now,
                now
            ],
        )
        .map_err(db_err)?;

        for (position, file_name) in batch.file_names.iter().enumerate() {
            tx.execute(
                "INSERT INTO batch_items (id, batch_id, position, file_name, status, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    id,
                    position as i64,
                    file_name,
                    BatchItemStatus::Queued.as_str(),
                    now
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        drop(conn);

        self.get_batch(&id)?
            .ok_or_else(|| BatchError::NotFound(id.clone()))
    }

    fn get_batch(&self, id: &str) -> Result<Option<Batch>, BatchError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, customer_id, created_by, status, created_at, updated_at
                 FROM batches WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((id, customer_id, created_by, status, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let status = BatchStatus::parse(&status).ok_or_else(|| db_err(bad_column(3, &status)))?;
        let items = Self::load_items(&conn, &id)?;
        Ok(Some(Batch {
            id,
            customer_id,
            created_by,
            status,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            items,
        }))
    }

    fn update_item(&self, item_id: &str, update: ItemUpdate) -> Result<(), BatchError> {
        let conn = self.lock()?;
        let now = ts(Utc::now());
        let changed = match update {
            ItemUpdate::Processing => conn.execute(
                "UPDATE batch_items SET status = ?, updated_at = ? WHERE id = ?",
                params![BatchItemStatus::Processing.as_str(), now, item_id],
            ),
            ItemUpdate::Completed { tender_id, deduped } => conn.execute(
                "UPDATE batch_items SET status = ?, tender_id = ?, deduped = ?, error = NULL, updated_at = ?
                 WHERE id = ?",
                params![BatchItemStatus::Completed.as_str(), tender_id, deduped, now, item_id],
            ),
            ItemUpdate::Failed { error } => conn.execute(
                "UPDATE batch_items SET status = ?, error = ?, updated_at = ? WHERE id = ?",
                params![BatchItemStatus::Failed.as_str(), error, now, item_id],
            ),
        }
        .map_err(db_err)?;

        if changed == 0 {
            return Err(BatchError::ItemNotFound(item_id.to_string()));
        }
        Ok(())
    }

    fn set_status(&self, batch_id: &str, status: BatchStatus) -> Result<(), BatchError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE batches SET status = ?, updated_at = ? WHERE id = ?",
                params![status.as_str(), ts(Utc::now()), batch_id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(BatchError::NotFound(batch_id.to_string()));
        }
        Ok(())
    }
}
