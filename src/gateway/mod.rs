//! The HTTP/WebSocket front door: composes every engine behind the
//! endpoint table in spec §6, and applies the same tower middleware stack
//! the teacher's `main.rs` built around `/payments`.

pub mod routes;
pub mod state;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router as AxumRouter;
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::gateway::state::AppState;

/// Builds the full axum router: every route in spec §6's endpoint table,
/// the teacher's trace/request-id/concurrency-limit/timeout tower stack,
/// and permissive CORS (the gateway is a public payment-gated API, not a
/// same-origin web app).
pub fn build_router(state: AppState) -> AxumRouter {
    let concurrency_limit = state.cfg.concurrency_limit;
    let request_timeout_ms = state.cfg.request_timeout_ms;

    AxumRouter::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats))
        .route("/proxy", post(routes::proxy))
        .route("/ws", get(routes::issue_ws_token))
        .route("/ws-connect", get(routes::ws_connect))
        .route("/node/join", post(routes::node_join))
        .route("/node/join-challenge", post(routes::node_join_challenge))
        .route("/node/verify/{join_id}", post(routes::node_verify_join))
        .route("/node/heartbeat/{node_id}", post(routes::node_heartbeat))
        .route("/node/status/{node_id}", get(routes::node_status))
        .route("/nodes", get(routes::list_nodes))
        .route("/update/latest", get(routes::latest_manifest))
        .route("/node/verify-integrity/{node_id}", post(routes::verify_integrity))
        .route("/admin/manifest", post(routes::admin_upload_manifest))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(CorsLayer::permissive())
                .layer(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(TimeoutLayer::new(Duration::from_millis(request_timeout_ms))),
        )
}
