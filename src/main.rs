use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use tokio::net::TcpListener;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod breaker;
mod config;
mod dedup;
mod dns;
mod error;
mod gateway;
mod node_iface;
mod orchestrator;
mod payment;
mod router;
mod session;
mod store;
mod telemetry;
mod types;

use config::Cfg;
use dns::{DnsProvider, HttpDnsProvider, InMemoryDnsProvider};
use gateway::state::AppState;
use orchestrator::{Orchestrator, OrchestratorConfig};
use payment::{HttpFacilitator, LocalFacilitator, PaymentFacilitator};
use store::NodeStore;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let prom_handle = telemetry::init_metrics();

    let cfg = Arc::new(Cfg::from_env()?);
    info!("cfg: {:?}", cfg.redacted());

    let store = Arc::new(NodeStore::connect(&cfg.sqlite_path).await?);

    let dns_provider: Arc<dyn DnsProvider> = match &cfg.dns_provider_url {
        Some(base_url) => Arc::new(HttpDnsProvider::new(
            node_iface::build_client(),
            base_url.clone(),
            cfg.dns_zone.clone(),
        )),
        None => Arc::new(InMemoryDnsProvider::new()),
    };

    let facilitator: Arc<dyn PaymentFacilitator> = match &cfg.facilitator_url {
        Some(base_url) if !cfg.local_mode => Arc::new(HttpFacilitator::new(
            node_iface::build_client(),
            base_url.clone(),
        )),
        _ => Arc::new(LocalFacilitator),
    };

    let dedup = Arc::new(dedup::DedupProxy::new(
        Duration::from_secs(cfg.cache_ttl_secs),
        Duration::from_secs(cfg.paid_mark_ttl_secs),
        Duration::from_millis(cfg.proxy_timeout_ms),
        cfg.proxy_max_redirects,
    ));

    let router = Arc::new(router::Router::new(store.clone()));
    let sessions = Arc::new(session::SessionManager::new(router.clone(), cfg.session_token_ttl_secs));

    let manifest_signing_pubkey = cfg
        .manifest_signing_pubkey_hex
        .as_deref()
        .map(hex::decode)
        .transpose()?
        .map(|bytes| {
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| anyhow::anyhow!("MANIFEST_SIGNING_PUBKEY_HEX must be 32 bytes"))
        })
        .transpose()?;

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        dns_provider,
        OrchestratorConfig {
            dns_zone: cfg.dns_zone.clone(),
            local_mode: cfg.local_mode,
            join_request_ttl: Duration::from_secs(cfg.join_request_ttl_secs),
            admission_base_price: cfg.admission_base_price,
            admission_increment: cfg.admission_increment,
            admission_max_price: cfg.admission_max_price,
            benchmark_admission_threshold: cfg.benchmark_admission_threshold,
            benchmark_fetch_timeout: Duration::from_millis(cfg.benchmark_fetch_timeout_ms),
            benchmark_cpu_timeout: Duration::from_millis(cfg.benchmark_cpu_timeout_ms),
            attestation_skew: chrono::Duration::seconds(cfg.attestation_skew_secs),
            manifest_signing_pubkey,
        },
    ));

    // Periodic sweeps: paid-mark/cache eviction (§4.1) and pending
    // session-token eviction (§4.3).
    tokio::spawn(dedup.clone().run_sweep_loop(Duration::from_secs(cfg.paid_mark_sweep_secs)));
    tokio::spawn(sessions.clone().run_sweep_loop(Duration::from_secs(cfg.session_token_sweep_secs)));

    let state = AppState {
        cfg: cfg.clone(),
        dedup,
        router,
        sessions,
        orchestrator,
        facilitator,
    };

    let prom_handle_route = prom_handle.clone();
    let app = gateway::build_router(state).route(
        "/metrics",
        get(move || {
            let h = prom_handle_route.clone();
            async move { h.render() }
        }),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
