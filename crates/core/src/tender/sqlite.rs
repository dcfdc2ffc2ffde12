//! SQLite-backed tender store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{
    ExtractionRun, NewExtractionRun, NewTender, StoreError, Tender, TenderFilter, TenderStore,
};
use crate::learning::{LearnableField, LearningEvent};
use crate::shipment::StructuredShipment;
use crate::verifier::TenderSource;

fn db_err(e: impl ToString) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Fixed-width UTC timestamps so string comparison orders chronologically.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(db_err)
}

fn json_col<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json_col<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

const TENDER_COLUMNS: &str = "id, customer_id, source_type, original_text, file_name, file_key, file_hash, batch_id, created_by, created_at, updated_at, final_shipment, finalized_by, finalized_at";

const RUN_COLUMNS: &str = "id, tender_id, customer_id, candidates, metadata, llm_output, warnings, provenance, normalization, usage, error, created_at";

pub struct SqliteTenderStore {
    conn: Mutex<Connection>,
}

impl SqliteTenderStore {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tenders (
                id TEXT PRIMARY KEY,
                customer_id TEXT,
                source_type TEXT NOT NULL,
                original_text TEXT NOT NULL,
                file_name TEXT,
                file_key TEXT,
                file_hash TEXT,
                batch_id TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                final_shipment TEXT,
                finalized_by TEXT,
                finalized_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tenders_dedupe ON tenders(customer_id, file_hash, created_at);
            CREATE INDEX IF NOT EXISTS idx_tenders_batch ON tenders(batch_id);

            CREATE TABLE IF NOT EXISTS extraction_runs (
                id TEXT PRIMARY KEY,
                tender_id TEXT NOT NULL REFERENCES tenders(id),
                customer_id TEXT,
                candidates TEXT NOT NULL,
                metadata TEXT NOT NULL,
                llm_output TEXT,
                warnings TEXT NOT NULL,
                provenance TEXT NOT NULL,
                normalization TEXT,
                usage TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_tender ON extraction_runs(tender_id, created_at);

            CREATE TABLE IF NOT EXISTS learning_events (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                tender_id TEXT NOT NULL,
                field_type TEXT NOT NULL,
                field_path TEXT NOT NULL,
                before_value TEXT,
                after_value TEXT,
                context TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_learning_customer ON learning_events(customer_id, created_at);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| db_err("connection mutex poisoned"))
    }

    fn row_to_tender(row: &rusqlite::Row) -> rusqlite::Result<Tender> {
        let source: String = row.get(2)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;
        let finalized_at: Option<String> = row.get(13)?;

        Ok(Tender {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            source_type: if source == "file" {
                TenderSource::File
            } else {
                TenderSource::Paste
            },
            original_text: row.get(3)?,
            file_name: row.get(4)?,
            file_key: row.get(5)?,
            file_hash: row.get(6)?,
            batch_id: row.get(7)?,
            created_by: row.get(8)?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            final_shipment: opt_json_col(row, 11)?,
            finalized_by: row.get(12)?,
            finalized_at: finalized_at.as_deref().map(parse_ts),
        })
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<ExtractionRun> {
        let created_at: String = row.get(11)?;
        Ok(ExtractionRun {
            id: row.get(0)?,
            tender_id: row.get(1)?,
            customer_id: row.get(2)?,
            candidates: json_col(row, 3)?,
            metadata: json_col(row, 4)?,
            llm_output: opt_json_col(row, 5)?,
            warnings: json_col(row, 6)?,
            provenance: json_col(row, 7)?,
            normalization: opt_json_col(row, 8)?,
            usage: opt_json_col(row, 9)?,
            error: row.get(10)?,
            created_at: parse_ts(&created_at),
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<LearningEvent> {
        let field_type: String = row.get(3)?;
        let created_at: String = row.get(8)?;
        Ok(LearningEvent {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            tender_id: row.get(2)?,
            field_type: LearnableField::parse(&field_type).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    Type::Text,
                    format!("unknown field type {}", field_type).into(),
                )
            })?,
            field_path: row.get(4)?,
            before_value: row.get(5)?,
            after_value: row.get(6)?,
            context: json_col(row, 7)?,
            created_at: parse_ts(&created_at),
        })
    }

    fn read_tender(conn: &Connection, id: &str) -> Result<Option<Tender>, StoreError> {
        conn.query_row(
            &format!("SELECT {} FROM tenders WHERE id = ?", TENDER_COLUMNS),
            params![id],
            Self::row_to_tender,
        )
        .optional()
        .map_err(db_err)
    }

    fn duplicate_in(
        conn: &Connection,
        customer_id: Option<&str>,
        file_hash: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Tender>, StoreError> {
        let since = ts(now - chrono::Duration::days(i64::from(window_days)));
        // `IS` so that tenders without a customer dedupe against each other.
        conn.query_row(
            &format!(
                "SELECT {} FROM tenders WHERE customer_id IS ? AND file_hash = ? AND created_at >= ? ORDER BY created_at DESC LIMIT 1",
                TENDER_COLUMNS
            ),
            params![customer_id, file_hash, since],
            Self::row_to_tender,
        )
        .optional()
        .map_err(db_err)
    }

    fn insert_tender(conn: &Connection, new: NewTender) -> Result<Tender, StoreError> {
        let now = Utc::now();
        let tender = Tender {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id: new.customer_id,
            source_type: new.source_type,
            original_text: new.original_text,
            file_name: new.file_name,
            file_key: new.file_key,
            file_hash: new.file_hash,
            batch_id: new.batch_id,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            final_shipment: None,
            finalized_by: None,
            finalized_at: None,
        };

        conn.execute(
            &format!(
                "INSERT INTO tenders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL)",
                TENDER_COLUMNS
            ),
            params![
                tender.id,
                tender.customer_id,
                tender.source_type.as_str(),
                tender.original_text,
                tender.file_name,
                tender.file_key,
                tender.file_hash,
                tender.batch_id,
                tender.created_by,
                ts(now),
                ts(now),
            ],
        )
        .map_err(db_err)?;

        Ok(tender)
    }
}

impl TenderStore for SqliteTenderStore {
    fn create_tender(&self, tender: NewTender) -> Result<Tender, StoreError> {
        let conn = self.lock()?;
        Self::insert_tender(&conn, tender)
    }

    fn create_unless_duplicate(
        &self,
        tender: NewTender,
        window_days: u32,
    ) -> Result<(Tender, bool), StoreError> {
        let conn = self.lock()?;
        if let Some(hash) = tender.file_hash.as_deref() {
            if let Some(existing) = Self::duplicate_in(
                &conn,
                tender.customer_id.as_deref(),
                hash,
                window_days,
                Utc::now(),
            )? {
                return Ok((existing, true));
            }
        }
        Ok((Self::insert_tender(&conn, tender)?, false))
    }

    fn get_tender(&self, id: &str) -> Result<Option<Tender>, StoreError> {
        let conn = self.lock()?;
        Self::read_tender(&conn, id)
    }

    fn list_tenders(&self, filter: &TenderFilter) -> Result<Vec<Tender>, StoreError> {
        let conn = self.lock()?;

        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(ref customer_id) = filter.customer_id {
            conditions.push("customer_id = ?");
            values.push(Box::new(customer_id.clone()));
        }
        if let Some(ref batch_id) = filter.batch_id {
            conditions.push("batch_id = ?");
            values.push(Box::new(batch_id.clone()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        values.push(Box::new(filter.limit));
        values.push(Box::new(filter.offset));

        let sql = format!(
            "SELECT {} FROM tenders {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            TENDER_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_tender)
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn find_duplicate(
        &self,
        customer_id: Option<&str>,
        file_hash: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Tender>, StoreError> {
        let conn = self.lock()?;
        Self::duplicate_in(&conn, customer_id, file_hash, window_days, now)
    }

    fn set_customer(&self, id: &str, customer_id: Option<&str>) -> Result<Tender, StoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE tenders SET customer_id = ?, updated_at = ? WHERE id = ?",
                params![customer_id, ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Self::read_tender(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save_final(
        &self,
        id: &str,
        shipment: &StructuredShipment,
        actor: &str,
    ) -> Result<Tender, StoreError> {
        let conn = self.lock()?;
        let now = ts(Utc::now());
        let updated = conn
            .execute(
                "UPDATE tenders SET final_shipment = ?, finalized_by = ?, finalized_at = ?, updated_at = ? WHERE id = ?",
                params![to_json(shipment)?, actor, now, now, id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Self::read_tender(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn append_run(&self, run: NewExtractionRun) -> Result<ExtractionRun, StoreError> {
        let conn = self.lock()?;
        if Self::read_tender(&conn, &run.tender_id)?.is_none() {
            return Err(StoreError::NotFound(run.tender_id));
        }

        let stored = ExtractionRun {
            id: uuid::Uuid::new_v4().to_string(),
            tender_id: run.tender_id,
            customer_id: run.customer_id,
            candidates: run.candidates,
            metadata: run.metadata,
            llm_output: run.llm_output,
            warnings: run.warnings,
            provenance: run.provenance,
            normalization: run.normalization,
            usage: run.usage,
            error: run.error,
            created_at: Utc::now(),
        };

        conn.execute(
            &format!(
                "INSERT INTO extraction_runs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                RUN_COLUMNS
            ),
            params![
                stored.id,
                stored.tender_id,
                stored.customer_id,
                to_json(&stored.candidates)?,
                to_json(&stored.metadata)?,
                stored.llm_output.as_ref().map(to_json).transpose()?,
                to_json(&stored.warnings)?,
                to_json(&stored.provenance)?,
                stored.normalization.as_ref().map(to_json).transpose()?,
                stored.usage.as_ref().map(to_json).transpose()?,
                stored.error,
                ts(stored.created_at),
            ],
        )
        .map_err(db_err)?;

        Ok(stored)
    }

    fn latest_run(&self, tender_id: &str) -> Result<Option<ExtractionRun>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM extraction_runs WHERE tender_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
                RUN_COLUMNS
            ),
            params![tender_id],
            Self::row_to_run,
        )
        .optional()
        .map_err(db_err)
    }

    fn list_runs(&self, tender_id: &str) -> Result<Vec<ExtractionRun>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM extraction_runs WHERE tender_id = ? ORDER BY created_at ASC, rowid ASC",
                RUN_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![tender_id], Self::row_to_run)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn record_learning_events(&self, events: &[LearningEvent]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        for event in events {
            tx.execute(
                "INSERT INTO learning_events (id, customer_id, tender_id, field_type, field_path, before_value, after_value, context, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    event.id,
                    event.customer_id,
                    event.tender_id,
                    event.field_type.as_str(),
                    event.field_path,
                    event.before_value,
                    event.after_value,
                    to_json(&event.context)?,
                    ts(event.created_at),
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    fn learning_events(&self, customer_id: &str) -> Result<Vec<LearningEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, customer_id, tender_id, field_type, field_path, before_value, after_value, context, created_at FROM learning_events WHERE customer_id = ? ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![customer_id], Self::row_to_event)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{DetectedEdit, EditContext};
    use crate::testing::fixtures;

    fn store() -> SqliteTenderStore {
        SqliteTenderStore::in_memory().unwrap()
    }

    fn new_tender(customer: Option<&str>, hash: Option<&str>) -> NewTender {
        NewTender {
            customer_id: customer.map(String::from),
            source_type: if hash.is_some() {
                TenderSource::File
            } else {
                TenderSource::Paste
            },
            original_text: fixtures::SAMPLE_TENDER.to_string(),
            file_name: hash.map(|_| "load.txt".to_string()),
            file_key: None,
            file_hash: hash.map(String::from),
            batch_id: None,
            created_by: "alice".to_string(),
        }
    }

    #[test]
    fn test_create_and_get_tender() {
        let store = store();
        let created = store.create_tender(new_tender(Some("c-1"), None)).unwrap();
        let loaded = store.get_tender(&created.id).unwrap().unwrap();

        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.source_type, TenderSource::Paste);
        assert_eq!(loaded.customer_id.as_deref(), Some("c-1"));
        assert!(loaded.final_shipment.is_none());
        assert!(store.get_tender("missing").unwrap().is_none());
    }

    #[test]
    fn test_find_duplicate_respects_customer_and_window() {
        let store = store();
        let first = store.create_tender(new_tender(Some("c-1"), Some("abc"))).unwrap();
        let now = Utc::now();

        let dup = store.find_duplicate(Some("c-1"), "abc", 7, now).unwrap();
        assert_eq!(dup.unwrap().id, first.id);

        assert!(store.find_duplicate(Some("c-2"), "abc", 7, now).unwrap().is_none());
        assert!(store.find_duplicate(None, "abc", 7, now).unwrap().is_none());
        assert!(store.find_duplicate(Some("c-1"), "other", 7, now).unwrap().is_none());

        let later = now + chrono::Duration::days(8);
        assert!(store.find_duplicate(Some("c-1"), "abc", 7, later).unwrap().is_none());
    }

    #[test]
    fn test_create_unless_duplicate() {
        let store = store();
        let (first, deduped) = store
            .create_unless_duplicate(new_tender(None, Some("abc")), 7)
            .unwrap();
        assert!(!deduped);

        let (second, deduped) = store
            .create_unless_duplicate(new_tender(None, Some("abc")), 7)
            .unwrap();
        assert!(deduped);
        assert_eq!(second.id, first.id);

        let (_, deduped) = store
            .create_unless_duplicate(new_tender(None, None), 7)
            .unwrap();
        assert!(!deduped);
    }

    #[test]
    fn test_runs_are_append_only_latest_wins() {
        let store = store();
        let tender = store.create_tender(new_tender(None, None)).unwrap();

        let first = store
            .append_run(NewExtractionRun {
                tender_id: tender.id.clone(),
                error: Some("timeout".into()),
                ..Default::default()
            })
            .unwrap();
        let second = store
            .append_run(NewExtractionRun {
                tender_id: tender.id.clone(),
                llm_output: Some(fixtures::sample_shipment()),
                ..Default::default()
            })
            .unwrap();

        let latest = store.latest_run(&tender.id).unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.llm_output, Some(fixtures::sample_shipment()));

        let runs = store.list_runs(&tender.id).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, first.id);
        assert_eq!(runs[0].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_append_run_for_missing_tender() {
        let err = store()
            .append_run(NewExtractionRun {
                tender_id: "nope".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("nope".into()));
    }

    #[test]
    fn test_save_final_and_set_customer() {
        let store = store();
        let tender = store.create_tender(new_tender(None, None)).unwrap();

        let updated = store.set_customer(&tender.id, Some("c-9")).unwrap();
        assert_eq!(updated.customer_id.as_deref(), Some("c-9"));

        let saved = store
            .save_final(&tender.id, &fixtures::sample_shipment(), "bob")
            .unwrap();
        assert_eq!(saved.final_shipment, Some(fixtures::sample_shipment()));
        assert_eq!(saved.finalized_by.as_deref(), Some("bob"));
        assert!(saved.finalized_at.is_some());

        assert!(matches!(
            store.save_final("missing", &fixtures::sample_shipment(), "bob"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_tenders_filters_by_customer() {
        let store = store();
        store.create_tender(new_tender(Some("c-1"), None)).unwrap();
        store.create_tender(new_tender(Some("c-2"), None)).unwrap();
        store.create_tender(new_tender(Some("c-1"), None)).unwrap();

        let filter = TenderFilter {
            customer_id: Some("c-1".into()),
            ..Default::default()
        };
        assert_eq!(store.list_tenders(&filter).unwrap().len(), 2);
        assert_eq!(store.list_tenders(&TenderFilter::default()).unwrap().len(), 3);
    }

    #[test]
    fn test_learning_events_roundtrip() {
        let store = store();
        let event = LearningEvent::from_edit(
            "c-1",
            "t-1",
            DetectedEdit {
                field_type: LearnableField::CargoCommodity,
                field_path: "cargo.commodity".into(),
                before_value: None,
                after_value: Some("Frozen Food".into()),
                context: EditContext {
                    temperature_value: Some(10.0),
                    ..Default::default()
                },
            },
        );
        store.record_learning_events(std::slice::from_ref(&event)).unwrap();

        let loaded = store.learning_events("c-1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, event.id);
        assert_eq!(loaded[0].field_type, LearnableField::CargoCommodity);
        assert_eq!(loaded[0].context.temperature_value, Some(10.0));
        assert!(store.learning_events("c-2").unwrap().is_empty());
    }

    #[test]
    fn test_file_based_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenders.db");
        let id = {
            let store = SqliteTenderStore::new(&path).unwrap();
            store.create_tender(new_tender(None, None)).unwrap().id
        };
        let reopened = SqliteTenderStore::new(&path).unwrap();
        assert!(reopened.get_tender(&id).unwrap().is_some());
    }
}
