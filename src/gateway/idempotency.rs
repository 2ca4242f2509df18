//! Duplicate-delivery suppression for webhook endpoints.
//!
//! Tracks accepted webhook ids within a TTL window. In-memory only —
//! intentionally resets on restart; a multi-instance deployment would back
//! this with a shared store behind the same interface.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

const MAX_ENTRIES: usize = 100_000;

pub struct IdempotencyStore {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    /// Atomically claim `id`: returns `true` on first delivery, `false` when
    /// the id was already accepted within the TTL. Single set-if-absent — no
    /// separate check-then-mark race.
    pub fn claim(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if seen.len() > MAX_ENTRIES {
            seen.retain(|_, at| now - *at < self.ttl);
        }
        if let Some(at) = seen.get(id)
            && now - *at < self.ttl
        {
            return false;
        }
        seen.insert(id.to_string(), now);
        true
    }

    /// Roll back a claim whose enqueue was refused.
    pub fn release(&self, id: &str) {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        seen.remove(id);
    }

    /// Status-endpoint lookup: has this id been accepted within the TTL?
    pub fn contains(&self, id: &str, now: DateTime<Utc>) -> bool {
        let seen = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        seen.get(id).is_some_and(|at| now - *at < self.ttl)
    }
}

impl std::fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
