//! SQLite-backed customer profile store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CargoHints, CreateCustomer, CustomerProfile, CustomerRule, CustomerStore, RuleError};

fn db_err(e: impl ToString) -> RuleError {
    RuleError::Database(e.to_string())
}

/// SQLite-backed customer store. Rules and cargo hints are stored as JSON
/// columns on the customer row so a profile saves atomically.
pub struct SqliteCustomerStore {
    conn: Mutex<Connection>,
}

impl SqliteCustomerStore {
    pub fn new(path: &Path) -> Result<Self, RuleError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, RuleError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RuleError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS customers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                rules TEXT NOT NULL,
                cargo_hints TEXT NOT NULL,
                prompt_notes TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_customers_name ON customers(name);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RuleError> {
        self.conn.lock().map_err(|_| db_err("connection mutex poisoned"))
    }

    fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<(CustomerProfile, bool)> {
        let rules_json: String = row.get(2)?;
        let hints_json: String = row.get(3)?;
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;

        let rules: Result<Vec<CustomerRule>, _> = serde_json::from_str(&rules_json);
        let hints: Result<CargoHints, _> = serde_json::from_str(&hints_json);
        let corrupt = rules.is_err() || hints.is_err();

        Ok((
            CustomerProfile {
                id: row.get(0)?,
                name: row.get(1)?,
                rules: rules.unwrap_or_default(),
                cargo_hints: hints.unwrap_or_default(),
                prompt_notes: row.get(4)?,
                version: row.get::<_, i64>(5)? as u64,
                created_at: parse_ts(&created_at),
                updated_at: parse_ts(&updated_at),
            },
            corrupt,
        ))
    }

    fn read(conn: &Connection, id: &str) -> Result<Option<CustomerProfile>, RuleError> {
        let row = conn
            .query_row(
                "SELECT id, name, rules, cargo_hints, prompt_notes, version, created_at, updated_at FROM customers WHERE id = ?",
                params![id],
                Self::row_to_profile,
            )
            .optional()
            .map_err(db_err)?;

        Ok(row.map(|(profile, corrupt)| {
            if corrupt {
                tracing::warn!(customer_id = %profile.id, "customer row has unreadable rule data");
            }
            profile
        }))
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl CustomerStore for SqliteCustomerStore {
    fn create(&self, request: CreateCustomer) -> Result<CustomerProfile, RuleError> {
        let conn = self.lock()?;
        let id = request
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut profile = CustomerProfile::new(id, request.name, Utc::now());
        profile.prompt_notes = request.prompt_notes;

        conn.execute(
            "INSERT INTO customers (id, name, rules, cargo_hints, prompt_notes, version, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
            params![
                profile.id,
                profile.name,
                serde_json::to_string(&profile.rules).map_err(db_err)?,
                serde_json::to_string(&profile.cargo_hints).map_err(db_err)?,
                profile.prompt_notes,
                profile.created_at.to_rfc3339(),
                profile.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(profile)
    }

    fn get(&self, id: &str) -> Result<Option<CustomerProfile>, RuleError> {
        let conn = self.lock()?;
        Self::read(&conn, id)
    }

    fn list(&self) -> Result<Vec<CustomerProfile>, RuleError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, name, rules, cargo_hints, prompt_notes, version, created_at, updated_at FROM customers ORDER BY name, id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], Self::row_to_profile)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows.into_iter().map(|(p, _)| p).collect())
    }

    fn save(
        &self,
        profile: &CustomerProfile,
        expected_version: u64,
    ) -> Result<CustomerProfile, RuleError> {
        let conn = self.lock()?;
        let now = Utc::now();
        let updated = conn
            .execute(
                "UPDATE customers SET name = ?, rules = ?, cargo_hints = ?, prompt_notes = ?, version = version + 1, updated_at = ? WHERE id = ? AND version = ?",
                params![
                    profile.name,
                    serde_json::to_string(&profile.rules).map_err(db_err)?,
                    serde_json::to_string(&profile.cargo_hints).map_err(db_err)?,
                    profile.prompt_notes,
                    now.to_rfc3339(),
                    profile.id,
                    expected_version as i64,
                ],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return match Self::read(&conn, &profile.id)? {
                Some(current) => Err(RuleError::VersionConflict {
                    customer_id: profile.id.clone(),
                    expected: expected_version,
                    actual: current.version,
                }),
                None => Err(RuleError::CustomerNotFound(profile.id.clone())),
            };
        }

        let mut saved = profile.clone();
        saved.version = expected_version + 1;
        saved.updated_at = now;
        Ok(saved)
    }
}
