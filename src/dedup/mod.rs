//! Idempotency-keyed request coalescing, response caching, and payment-gate
//! bookkeeping. See spec §4.1.
//!
//! Single-flight coalescing is grounded on x402-rs's `PendingNonceManager`
//! (`Arc<DashMap<K, Arc<Mutex<V>>>>`): concurrent callers for the same
//! fingerprint contend on the same per-key async mutex instead of polling a
//! shared future, so whichever caller wins the lock performs the outbound
//! call and every later caller simply re-checks the (by-then populated)
//! cache once it acquires the lock.

pub mod cache;
pub mod outbound;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use http::Method;
use tokio::sync::Mutex as AsyncMutex;

use crate::dedup::cache::{CachedResponse, ResponseCache};
use crate::error::GatewayError;

pub struct DedupProxy {
    cache: ResponseCache,
    client: reqwest::Client,
    inflight: DashMap<String, Arc<AsyncMutex<()>>>,
    proxy_timeout: Duration,
}

pub struct HandleOutcome {
    pub response: CachedResponse,
    pub cached: bool,
}

impl DedupProxy {
    pub fn new(
        cache_ttl: Duration,
        paid_mark_ttl: Duration,
        proxy_timeout: Duration,
        max_redirects: usize,
    ) -> Self {
        Self {
            cache: ResponseCache::new(cache_ttl, paid_mark_ttl),
            client: outbound::build_client(proxy_timeout, max_redirects),
            inflight: DashMap::new(),
            proxy_timeout,
        }
    }

    /// Fast free-path lookup: a cache hit needs no payment at all.
    pub fn cached(&self, fingerprint: &str) -> Option<CachedResponse> {
        self.cache.get(fingerprint)
    }

    /// Whether this fingerprint was already paid for in the current grace
    /// window (cache miss but payment already verified and in-flight, or a
    /// client retry shortly after).
    pub fn is_paid(&self, fingerprint: &str) -> bool {
        self.cache.is_paid(fingerprint)
    }

    fn lock_for(&self, fingerprint: &str) -> Arc<AsyncMutex<()>> {
        self.inflight
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// `Handle(target_url, method, headers, body)`. Caller has already
    /// ensured payment is either cached-free or previously verified.
    pub async fn handle(
        &self,
        fingerprint: &str,
        method: Method,
        target_url: &str,
        headers: http::HeaderMap,
        body: Option<serde_json::Value>,
    ) -> Result<HandleOutcome, GatewayError> {
        if let Some(hit) = self.cache.get(fingerprint) {
            metrics::counter!("dedup_cache_hit_total").increment(1);
            return Ok(HandleOutcome { response: hit, cached: true });
        }

        let lock = self.lock_for(fingerprint);
        let _guard = lock.lock().await;

        // Re-check: another caller may have completed the outbound call
        // while we waited for the lock.
        if let Some(hit) = self.cache.get(fingerprint) {
            self.inflight.remove(fingerprint);
            metrics::counter!("dedup_coalesced_hit_total").increment(1);
            return Ok(HandleOutcome { response: hit, cached: true });
        }

        self.cache.mark_paid(fingerprint);
        let cleansed = outbound::cleanse_headers(&headers);

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.proxy_timeout,
            outbound::dispatch(&self.client, &method, target_url, cleansed, body),
        )
        .await;
        metrics::histogram!("dedup_outbound_latency_ms").record(started.elapsed().as_millis() as f64);

        let outcome = match result {
            Ok(Ok(response)) => {
                metrics::counter!("dedup_outbound_dispatch_total", "outcome" => "ok").increment(1);
                self.cache.insert(fingerprint, response.clone());
                Ok(HandleOutcome { response, cached: false })
            }
            Ok(Err(transport_err)) => {
                metrics::counter!("dedup_outbound_dispatch_total", "outcome" => "transport_error").increment(1);
                self.cache.revoke_paid(fingerprint);
                let details = outbound::synthetic_error_response(target_url, &transport_err, "transport_error");
                Err(GatewayError::UpstreamUnreachable { message: transport_err, details })
            }
            Err(_elapsed) => {
                metrics::counter!("dedup_outbound_dispatch_total", "outcome" => "timeout").increment(1);
                self.cache.revoke_paid(fingerprint);
                Err(GatewayError::UpstreamTimeout)
            }
        };

        self.inflight.remove(fingerprint);
        outcome
    }

    pub fn stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Periodic sweep task: evicts expired cache entries and stale paid
    /// marks. Spec §4.1 calls for a 60 s cadence.
    pub async fn run_sweep_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.cache.run_pending_sweeps();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hit_short_circuits_without_dispatch() {
        let proxy = DedupProxy::new(
            Duration::from_secs(300),
            Duration::from_secs(300),
            Duration::from_secs(30),
            5,
        );
        proxy.cache.insert(
            "k1",
            CachedResponse {
                status: 200,
                status_text: "OK".into(),
                headers: vec![],
                data: serde_json::json!({"x": 1}),
                captured_at: chrono::Utc::now(),
            },
        );
        let outcome = proxy
            .handle(
                "k1",
                Method::POST,
                "https://example.invalid/x",
                http::HeaderMap::new(),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.cached);
    }

    #[tokio::test]
    async fn transport_failure_revokes_paid_mark() {
        let proxy = DedupProxy::new(
            Duration::from_secs(300),
            Duration::from_secs(300),
            Duration::from_millis(200),
            5,
        );
        let result = proxy
            .handle(
                "k2",
                Method::POST,
                "http://127.0.0.1:1/unreachable",
                http::HeaderMap::new(),
                None,
            )
            .await;
        assert!(result.is_err());
        assert!(!proxy.is_paid("k2"));
    }
}
