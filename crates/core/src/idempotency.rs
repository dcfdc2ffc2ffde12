//! Replay protection for retried mutating requests.
//!
//! A request is identified by (idempotency key, actor, route) and
//! fingerprinted by a SHA-256 of its body. A repeated request with the same
//! fingerprint replays the stored response; the same key with a different
//! body is a conflict.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub key: String,
    pub actor: String,
    pub route: String,
}

impl IdempotencyKey {
    pub fn new(key: impl Into<String>, actor: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            actor: actor.into(),
            route: route.into(),
        }
    }
}

/// Hex SHA-256 of a request body.
pub fn fingerprint(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyOutcome {
    /// First sighting; the caller should execute and then `complete`.
    Fresh,
    /// Same request already completed; here is its response.
    Replay(Value),
    /// Same key was used with a different request body.
    Conflict,
    /// Same request is still executing.
    InFlight,
}

enum State {
    Pending,
    Done(Value),
}

struct Entry {
    fingerprint: String,
    state: State,
    stored_at: Instant,
}

pub struct IdempotencyCache {
    ttl: Duration,
    entries: Mutex<HashMap<IdempotencyKey, Entry>>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<IdempotencyKey, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up `key` and reserve it when unseen.
    pub fn begin(&self, key: &IdempotencyKey, fingerprint: &str) -> IdempotencyOutcome {
        let now = Instant::now();
        let mut entries = self.entries();
        let ttl = self.ttl;
        entries.retain(|_, e| now.duration_since(e.stored_at) < ttl);

        match entries.get(key) {
            Some(entry) if entry.fingerprint != fingerprint => {
                debug!(key = %key.key, route = %key.route, "Idempotency key reused with different body");
                IdempotencyOutcome::Conflict
            }
            Some(Entry {
                state: State::Done(value),
                ..
            }) => IdempotencyOutcome::Replay(value.clone()),
            Some(Entry {
                state: State::Pending,
                ..
            }) => IdempotencyOutcome::InFlight,
            None => {
                entries.insert(
                    key.clone(),
                    Entry {
                        fingerprint: fingerprint.to_string(),
                        state: State::Pending,
                        stored_at: now,
                    },
                );
                IdempotencyOutcome::Fresh
            }
        }
    }

    /// Store the response for a reserved key.
    pub fn complete(&self, key: &IdempotencyKey, response: Value) {
        if let Some(entry) = self.entries().get_mut(key) {
            entry.state = State::Done(response);
            entry.stored_at = Instant::now();
        }
    }

    /// Release a reservation after a failure so the request can be retried.
    pub fn abandon(&self, key: &IdempotencyKey) {
        let mut entries = self.entries();
        if matches!(entries.get(key), Some(Entry { state: State::Pending, .. })) {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> IdempotencyKey {
        IdempotencyKey::new("k-1", "alice", "reprocess")
    }

    #[test]
    fn test_fresh_then_in_flight_then_replay() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let fp = fingerprint(br#"{"customer_id":"c-1"}"#);

        assert_eq!(cache.begin(&key(), &fp), IdempotencyOutcome::Fresh);
        assert_eq!(cache.begin(&key(), &fp), IdempotencyOutcome::InFlight);

        cache.complete(&key(), json!({"ok": true}));
        assert_eq!(
            cache.begin(&key(), &fp),
            IdempotencyOutcome::Replay(json!({"ok": true}))
        );
    }

    #[test]
    fn test_different_body_conflicts() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        cache.begin(&key(), &fingerprint(b"a"));
        cache.complete(&key(), json!(1));

        assert_eq!(
            cache.begin(&key(), &fingerprint(b"b")),
            IdempotencyOutcome::Conflict
        );
    }

    #[test]
    fn test_key_is_scoped_by_actor_and_route() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let fp = fingerprint(b"same");
        assert_eq!(cache.begin(&key(), &fp), IdempotencyOutcome::Fresh);
        assert_eq!(
            cache.begin(&IdempotencyKey::new("k-1", "bob", "reprocess"), &fp),
            IdempotencyOutcome::Fresh
        );
        assert_eq!(
            cache.begin(&IdempotencyKey::new("k-1", "alice", "final"), &fp),
            IdempotencyOutcome::Fresh
        );
    }

    #[test]
    fn test_abandon_allows_retry() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let fp = fingerprint(b"x");
        cache.begin(&key(), &fp);
        cache.abandon(&key());
        assert_eq!(cache.begin(&key(), &fp), IdempotencyOutcome::Fresh);
    }

    #[test]
    fn test_expired_entries_are_evicted() {
        let cache = IdempotencyCache::new(Duration::ZERO);
        let fp = fingerprint(b"x");
        cache.begin(&key(), &fp);
        cache.complete(&key(), json!(1));
        assert_eq!(cache.begin(&key(), &fp), IdempotencyOutcome::Fresh);
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
