//! Response cache and paid-mark bookkeeping for the dedup proxy.
//!
//! Grounded on `zhubby-moltis`'s `GatewayState`/`DedupeCache` (TTL-evicted
//! map keyed by a request fingerprint) generalized from a fixed key shape to
//! an arbitrary idempotency key, backed by `moka` (teacher already depends
//! on it for its own idempotency cache).

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CachedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub data: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

/// Response cache (free-forever-within-TTL) and paid-mark grace window
/// (sliding, revocable), intentionally separate per spec §9 design notes.
pub struct ResponseCache {
    responses: Cache<String, CachedResponse>,
    paid_marks: Cache<String, DateTime<Utc>>,
}

impl ResponseCache {
    pub fn new(cache_ttl: Duration, paid_mark_ttl: Duration) -> Self {
        Self {
            responses: Cache::builder().time_to_live(cache_ttl).build(),
            paid_marks: Cache::builder().time_to_idle(paid_mark_ttl).build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        self.responses.get(key)
    }

    pub fn insert(&self, key: &str, resp: CachedResponse) {
        self.responses.insert(key.to_string(), resp);
    }

    pub fn is_paid(&self, key: &str) -> bool {
        self.paid_marks.get(key).is_some()
    }

    pub fn mark_paid(&self, key: &str) {
        self.paid_marks.insert(key.to_string(), Utc::now());
    }

    pub fn revoke_paid(&self, key: &str) {
        self.paid_marks.invalidate(key);
    }

    /// Forces eviction of expired entries. Moka evicts lazily on access; this
    /// is invoked from the periodic sweep task (spec §4.1: "every 60s evicts
    /// PaidMarks older than 5 min") so idle keys do not linger indefinitely.
    pub fn run_pending_sweeps(&self) {
        self.responses.run_pending_tasks();
        self.paid_marks.run_pending_tasks();
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.responses.entry_count(), self.paid_marks.entry_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_mark_revocation_clears_immediately() {
        let cache = ResponseCache::new(Duration::from_secs(300), Duration::from_secs(300));
        cache.mark_paid("k1");
        assert!(cache.is_paid("k1"));
        cache.revoke_paid("k1");
        assert!(!cache.is_paid("k1"));
    }

    #[test]
    fn cache_and_paid_marks_are_independent() {
        let cache = ResponseCache::new(Duration::from_secs(300), Duration::from_secs(300));
        cache.mark_paid("k2");
        assert!(cache.get("k2").is_none());
        cache.insert(
            "k2",
            CachedResponse {
                status: 200,
                status_text: "OK".into(),
                headers: vec![],
                data: serde_json::json!({"ok": true}),
                captured_at: Utc::now(),
            },
        );
        cache.revoke_paid("k2");
        assert!(cache.get("k2").is_some());
    }
}
