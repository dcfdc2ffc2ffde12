//! Exclusive per-tender locks.
//!
//! A reprocess holds the tender's lock for its whole run. A second caller is
//! rejected with [`TenderLockError`] instead of waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("Tender {tender_id} is locked by {holder} ({reason})")]
pub struct TenderLockError {
    pub tender_id: String,
    pub holder: String,
    pub reason: String,
    pub acquired_at: DateTime<Utc>,
}

/// Snapshot of a held lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub tender_id: String,
    pub holder: String,
    pub reason: String,
    pub acquired_at: DateTime<Utc>,
}

struct Entry {
    token: u64,
    info: LockInfo,
    expires: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_token: u64,
}

/// In-process lock table. Cloning shares the table.
#[derive(Clone)]
pub struct TenderLockManager {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
}

impl TenderLockManager {
    /// Locks older than `ttl` are treated as abandoned and may be taken over.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ttl,
        }
    }

    fn lock_table(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
        match inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn acquire(
        &self,
        tender_id: &str,
        holder: &str,
        reason: &str,
    ) -> Result<TenderLockGuard, TenderLockError> {
        let now = Instant::now();
        let mut table = Self::lock_table(&self.inner);

        if let Some(existing) = table.entries.get(tender_id) {
            if existing.expires > now {
                debug!(tender_id, holder = %existing.info.holder, "Tender lock contended");
                return Err(TenderLockError {
                    tender_id: tender_id.to_string(),
                    holder: existing.info.holder.clone(),
                    reason: existing.info.reason.clone(),
                    acquired_at: existing.info.acquired_at,
                });
            }
            warn!(
                tender_id,
                stale_holder = %existing.info.holder,
                "Taking over expired tender lock"
            );
        }

        table.next_token += 1;
        let token = table.next_token;
        table.entries.insert(
            tender_id.to_string(),
            Entry {
                token,
                info: LockInfo {
                    tender_id: tender_id.to_string(),
                    holder: holder.to_string(),
                    reason: reason.to_string(),
                    acquired_at: Utc::now(),
                },
                expires: now + self.ttl,
            },
        );

        Ok(TenderLockGuard {
            inner: Arc::clone(&self.inner),
            tender_id: tender_id.to_string(),
            token,
        })
    }

    /// Current unexpired holder of a tender's lock.
    pub fn holder(&self, tender_id: &str) -> Option<LockInfo> {
        let table = Self::lock_table(&self.inner);
        table
            .entries
            .get(tender_id)
            .filter(|e| e.expires > Instant::now())
            .map(|e| e.info.clone())
    }
}

/// Releases the lock when dropped, unless it already expired and was taken
/// over by someone else.
pub struct TenderLockGuard {
    inner: Arc<Mutex<Inner>>,
    tender_id: String,
    token: u64,
}

impl TenderLockGuard {
    pub fn tender_id(&self) -> &str {
        &self.tender_id
    }
}

impl Drop for TenderLockGuard {
    fn drop(&mut self) {
        let mut table = TenderLockManager::lock_table(&self.inner);
        if table
            .entries
            .get(&self.tender_id)
            .is_some_and(|e| e.token == self.token)
        {
            table.entries.remove(&self.tender_id);
            debug!(tender_id = %self.tender_id, "Tender lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_conflicts_with_holder() {
        let locks = TenderLockManager::new(Duration::from_secs(60));
        let _guard = locks.acquire("t-1", "alice", "reprocess").unwrap();

        let err = locks.acquire("t-1", "bob", "reprocess").err().unwrap();
        assert_eq!(err.holder, "alice");
        assert_eq!(err.reason, "reprocess");
        assert_eq!(err.tender_id, "t-1");
    }

    #[test]
    fn test_drop_releases() {
        let locks = TenderLockManager::new(Duration::from_secs(60));
        {
            let guard = locks.acquire("t-1", "alice", "reprocess").unwrap();
            assert_eq!(guard.tender_id(), "t-1");
            assert_eq!(locks.holder("t-1").unwrap().holder, "alice");
        }
        assert!(locks.holder("t-1").is_none());
        assert!(locks.acquire("t-1", "bob", "save").is_ok());
    }

    #[test]
    fn test_locks_are_per_tender() {
        let locks = TenderLockManager::new(Duration::from_secs(60));
        let _a = locks.acquire("t-1", "alice", "reprocess").unwrap();
        assert!(locks.acquire("t-2", "alice", "reprocess").is_ok());
    }

    #[test]
    fn test_expired_lock_is_taken_over_and_old_guard_does_not_release() {
        let locks = TenderLockManager::new(Duration::ZERO);
        let stale = locks.acquire("t-1", "alice", "reprocess").unwrap();
        let fresh = locks.acquire("t-1", "bob", "reprocess").unwrap();

        drop(stale);
        {
            let table = TenderLockManager::lock_table(&locks.inner);
            assert_eq!(table.entries["t-1"].info.holder, "bob");
        }
        drop(fresh);
        let table = TenderLockManager::lock_table(&locks.inner);
        assert!(table.entries.is_empty());
    }
}
