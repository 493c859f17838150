//! Shared application state composing every engine, following the
//! teacher's `AppState` convention in `main.rs`.

use std::sync::Arc;

use crate::config::Cfg;
use crate::dedup::DedupProxy;
use crate::orchestrator::Orchestrator;
use crate::payment::PaymentFacilitator;
use crate::router::Router;
use crate::session::SessionManager;

pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Cfg>,
    pub dedup: Arc<DedupProxy>,
    pub router: Arc<Router>,
    pub sessions: Arc<SessionManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub facilitator: Arc<dyn PaymentFacilitator>,
}
