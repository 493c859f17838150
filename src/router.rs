//! Sticky, load-balanced worker-node selection.
//!
//! Generalizes the teacher's fixed two-processor `RouteStrategy` into
//! power-of-two-choices over an arbitrary active node set, with per-(dedupe
//! key) stickiness and preference filters (region/domain/exclude). See
//! spec §4.2.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rand::Rng;

use crate::breaker::Breaker;
use crate::store::NodeStore;
use crate::types::{Node, NodeId, NodeStatus};

/// Preference filters extracted from request headers (`x-node-exclude`,
/// `x-node-region`, `x-node-domain`).
#[derive(Debug, Clone, Default)]
pub struct RoutePreferences {
    pub exclude: Vec<NodeId>,
    pub region: Vec<String>,
    pub domain: Vec<String>,
}

impl RoutePreferences {
    pub fn from_headers(headers: &http::HeaderMap) -> Self {
        let split_csv = |name: &str| -> Vec<String> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default()
        };
        let exclude = split_csv("x-node-exclude")
            .into_iter()
            .filter_map(|s| NodeId::from_hex(&s))
            .collect();
        RoutePreferences {
            exclude,
            region: split_csv("x-node-region"),
            domain: split_csv("x-node-domain"),
        }
    }

    fn matches(&self, node: &Node) -> bool {
        if self.exclude.contains(&node.id) {
            return false;
        }
        if !self.region.is_empty() {
            let region_lower = node.region.to_lowercase();
            let any_match = self
                .region
                .iter()
                .any(|token| region_lower.contains(&token.to_lowercase()));
            if !any_match {
                return false;
            }
        }
        if !self.domain.is_empty() && !self.domain.iter().any(|d| d == &node.domain) {
            return false;
        }
        true
    }
}

/// Per-node load counters and a health breaker, keyed by node id.
struct NodeBookkeeping {
    active_http: std::sync::atomic::AtomicUsize,
    active_ws: std::sync::atomic::AtomicUsize,
    breaker: Breaker,
}

impl Default for NodeBookkeeping {
    fn default() -> Self {
        Self {
            active_http: std::sync::atomic::AtomicUsize::new(0),
            active_ws: std::sync::atomic::AtomicUsize::new(0),
            breaker: Breaker::new(10, 0.5, std::time::Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RouterStats {
    pub total_selections: u64,
    pub sticky_hits: u64,
    pub fallbacks: u64,
}

/// Selects worker nodes for HTTP/WS sessions: sticky-first, then
/// power-of-two-choices among preference-filtered active candidates.
pub struct Router {
    store: Arc<NodeStore>,
    sticky: DashMap<String, NodeId>,
    bookkeeping: DashMap<NodeId, NodeBookkeeping>,
    total_selections: AtomicU64,
    sticky_hits: AtomicU64,
    fallbacks: AtomicU64,
}

impl Router {
    pub fn new(store: Arc<NodeStore>) -> Self {
        Self {
            store,
            sticky: DashMap::new(),
            bookkeeping: DashMap::new(),
            total_selections: AtomicU64::new(0),
            sticky_hits: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    fn load_of(&self, id: &NodeId) -> usize {
        self.bookkeeping
            .get(id)
            .map(|bk| {
                bk.active_http.load(Ordering::Relaxed) + bk.active_ws.load(Ordering::Relaxed)
            })
            .unwrap_or(0)
    }

    fn node_is_healthy(&self, id: &NodeId) -> bool {
        self.bookkeeping
            .get(id)
            .map(|bk| !bk.breaker.is_open())
            .unwrap_or(true)
    }

    /// Selects a node for `dedupe_key`, honoring stickiness and preference
    /// filters. Returns `None` if no active candidates remain.
    pub async fn select(
        &self,
        dedupe_key: &str,
        preferences: &RoutePreferences,
    ) -> Option<Node> {
        self.total_selections.fetch_add(1, Ordering::Relaxed);

        if let Some(sticky_id) = self.sticky.get(dedupe_key).map(|r| *r) {
            if let Ok(Some(node)) = self.store.get_node(&sticky_id).await {
                if node.status == NodeStatus::Active {
                    self.sticky_hits.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("router_selection_total", "outcome" => "sticky_hit").increment(1);
                    return Some(node);
                }
            }
            self.sticky.remove(dedupe_key);
        }

        let nodes = self.store.list_nodes().await.ok()?;
        let candidates: Vec<Node> = nodes
            .into_iter()
            .filter(|n| n.status == NodeStatus::Active)
            .filter(|n| preferences.matches(n))
            .filter(|n| self.node_is_healthy(&n.id))
            .collect();

        if candidates.is_empty() {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("router_selection_total", "outcome" => "no_candidates").increment(1);
            return None;
        }

        let chosen = if candidates.len() == 1 {
            candidates.into_iter().next().unwrap()
        } else {
            let (i, j) = {
                let mut rng = rand::rng();
                let i = rng.random_range(0..candidates.len());
                let mut j = rng.random_range(0..candidates.len());
                if candidates.len() > 1 {
                    while j == i {
                        j = rng.random_range(0..candidates.len());
                    }
                }
                (i, j)
            };
            let load_i = self.load_of(&candidates[i].id);
            let load_j = self.load_of(&candidates[j].id);
            if load_j < load_i {
                candidates[j].clone()
            } else {
                candidates[i].clone()
            }
        };

        self.sticky.insert(dedupe_key.to_string(), chosen.id);
        metrics::counter!("router_selection_total", "outcome" => "power_of_two").increment(1);
        Some(chosen)
    }

    pub fn incr_http(&self, id: &NodeId) {
        self.bookkeeping
            .entry(*id)
            .or_default()
            .active_http
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_http(&self, id: &NodeId) {
        if let Some(bk) = self.bookkeeping.get(id) {
            let _ = bk
                .active_http
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    Some(v.saturating_sub(1))
                });
        }
    }

    pub fn incr_ws(&self, id: &NodeId) {
        self.bookkeeping
            .entry(*id)
            .or_default()
            .active_ws
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_ws(&self, id: &NodeId) {
        if let Some(bk) = self.bookkeeping.get(id) {
            let _ = bk
                .active_ws
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    Some(v.saturating_sub(1))
                });
        }
    }

    /// Records a dial/connect failure against a node's health breaker.
    pub fn note_failure(&self, id: &NodeId) {
        self.bookkeeping.entry(*id).or_default().breaker.on_failure();
    }

    pub fn note_success(&self, id: &NodeId) {
        self.bookkeeping.entry(*id).or_default().breaker.on_success();
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            total_selections: self.total_selections.load(Ordering::Relaxed),
            sticky_hits: self.sticky_hits.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Per-node load distribution snapshot: (node_id, active_http, active_ws).
    pub fn load_distribution(&self) -> Vec<(NodeId, usize, usize)> {
        self.bookkeeping
            .iter()
            .map(|entry| {
                let id = *entry.key();
                let bk = entry.value();
                (
                    id,
                    bk.active_http.load(Ordering::Relaxed),
                    bk.active_ws.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_region_substring_is_case_insensitive() {
        let prefs = RoutePreferences {
            exclude: vec![],
            region: vec!["us".into()],
            domain: vec![],
        };
        let node = sample_node("US-East-1");
        assert!(prefs.matches(&node));
    }

    #[test]
    fn preferences_exclude_filters_node() {
        let id = NodeId::random();
        let mut node = sample_node("eu");
        node.id = id;
        let prefs = RoutePreferences {
            exclude: vec![id],
            region: vec![],
            domain: vec![],
        };
        assert!(!prefs.matches(&node));
    }

    fn sample_node(region: &str) -> Node {
        Node {
            id: NodeId::random(),
            pubkey_der: vec![],
            alg: crate::types::SigAlg::Ed25519,
            region: region.to_string(),
            capabilities: crate::types::Capabilities {
                ipv6: "::1".into(),
                ipv4: None,
                port: 8080,
                benchmark_score: Some(85.0),
            },
            evm_address: None,
            solana_address: None,
            domain: "a.consensus.local".into(),
            tls_mode: crate::types::TlsMode::None,
            status: NodeStatus::Active,
            verified: true,
            software_version: None,
            build_digest: None,
            last_verified_at: None,
            latest_heartbeat: None,
        }
    }
}
