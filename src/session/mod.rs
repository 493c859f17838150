//! Metered WebSocket session manager: two-phase handshake (HTTP token issue,
//! WS upgrade consuming it), routing to a worker node or local echo
//! fallback, and budget-enforced bidirectional proxying. See spec §4.3.
//!
//! Grounded on `TaceoLabs-oprf-service`'s `open_sessions.rs` drop-guard
//! bookkeeping pattern for pending-token lifecycle, and axum's own ws
//! example for the upgrade/frame-loop shape (see `pump.rs`).

pub mod pricing;
pub mod pump;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use dashmap::DashMap;

use crate::node_iface;
use crate::router::{Router, RoutePreferences};
use crate::session::pump::{NodeLink, SessionUsageCounters, run_pump, session_start_frame};
use crate::types::{PricingModel, SessionLimits, SessionToken, SessionTokenId};

pub struct SessionManager {
    pending_tokens: DashMap<SessionTokenId, SessionToken>,
    router: Arc<Router>,
    token_ttl: chrono::Duration,
}

pub struct IssuedToken {
    pub token: SessionToken,
    pub cost: f64,
}

impl SessionManager {
    pub fn new(router: Arc<Router>, token_ttl_secs: u64) -> Self {
        Self {
            pending_tokens: DashMap::new(),
            router,
            token_ttl: chrono::Duration::seconds(token_ttl_secs as i64),
        }
    }

    /// Phase A: issues a single-use token after payment has already cleared.
    pub fn issue_token(&self, model: PricingModel, minutes: f64, megabytes: f64) -> IssuedToken {
        let cost = pricing::calculate_session_cost(model, minutes, megabytes);
        let token = SessionToken {
            id: SessionTokenId::random(),
            model,
            minutes,
            megabytes,
            expires_at: chrono::Utc::now() + self.token_ttl,
        };
        self.pending_tokens.insert(token.id, token.clone());
        IssuedToken { token, cost }
    }

    /// Phase B: consumes a token atomically. Returns `None` for an unknown,
    /// expired, or already-consumed token — all mapped to the same 401 by
    /// the caller, regardless of which condition applied.
    pub fn consume_token(&self, id: &SessionTokenId) -> Option<SessionToken> {
        let (_, token) = self.pending_tokens.remove(id)?;
        if token.expires_at < chrono::Utc::now() {
            return None;
        }
        Some(token)
    }

    pub async fn run_sweep_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            self.pending_tokens.retain(|_, token| token.expires_at >= now);
        }
    }

    /// Runs a full session: selects a node (or falls back to local echo),
    /// dials it, sends the `session_start` control frame, pumps frames until
    /// a budget is exhausted, then tears down router bookkeeping.
    pub async fn run_session(
        &self,
        mut client: WebSocket,
        session_id: &str,
        token: &SessionToken,
        preferences: &RoutePreferences,
    ) -> SessionUsageCounters {
        let limits: SessionLimits = pricing::derive_limits(token.model, token.minutes, token.megabytes);
        let selected = self.router.select(session_id, preferences).await;

        let (link, served_by) = match &selected {
            Some(node) => {
                self.router.incr_ws(&node.id);
                match node_iface::dial_node_session(
                    &node.domain,
                    node.tls_mode,
                    session_id,
                    model_str(token.model),
                    token.minutes,
                    token.megabytes,
                )
                .await
                {
                    Ok(stream) => (NodeLink::Remote(stream), node.domain.clone()),
                    Err(_) => {
                        self.router.decr_ws(&node.id);
                        self.router.note_failure(&node.id);
                        (NodeLink::LocalEcho, "local".to_string())
                    }
                }
            }
            None => (NodeLink::LocalEcho, "local".to_string()),
        };

        let start_frame = session_start_frame(session_id, token.model, &served_by, limits);
        {
            use futures::SinkExt;
            let _ = client.send(start_frame).await;
        }

        let usage = run_pump(client, link, limits).await;

        if let Some(node) = &selected {
            if served_by == node.domain {
                self.router.decr_ws(&node.id);
                self.router.note_success(&node.id);
            }
        }

        usage
    }
}

fn model_str(model: PricingModel) -> &'static str {
    match model {
        PricingModel::Time => "time",
        PricingModel::Data => "data",
        PricingModel::Hybrid => "hybrid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NodeStore;

    async fn manager() -> SessionManager {
        let store = NodeStore::connect(":memory:").await.unwrap();
        let router = Arc::new(Router::new(Arc::new(store)));
        SessionManager::new(router, 60)
    }

    #[tokio::test]
    async fn issued_token_is_consumed_exactly_once() {
        let mgr = manager().await;
        let issued = mgr.issue_token(PricingModel::Time, 5.0, 0.0);
        let first = mgr.consume_token(&issued.token.id);
        assert!(first.is_some());
        let second = mgr.consume_token(&issued.token.id);
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_rejected_on_consume() {
        let mgr = manager().await;
        let mut issued = mgr.issue_token(PricingModel::Data, 0.0, 20.0);
        issued.token.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        mgr.pending_tokens.insert(issued.token.id, issued.token.clone());
        let result = mgr.consume_token(&issued.token.id);
        assert!(result.is_none());
    }
}
