//! Tracing and metrics bootstrap, extracted from the gateway's entry point
//! so `main` stays a thin wiring function.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the tracing subscriber with env-filter, compact formatting, and
/// per-module default directives.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("consensus_gateway=info".parse().unwrap())
                .add_directive("axum=warn".parse().unwrap())
                .add_directive("tower_http=warn".parse().unwrap())
                .add_directive("sqlx=warn".parse().unwrap()),
        )
        .with_target(false)
        .compact()
        .init();
}

/// Installs the global metrics recorder and returns a handle whose
/// `render()` backs the `/metrics` endpoint.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("install recorder")
}
