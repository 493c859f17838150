//! Outbound interface to a worker node: HTTP benchmark probes and the WS
//! dial used by SessionManager. This is the only way the gateway talks to
//! node-side handlers (spec §1 scope note).
//!
//! Grounded on the teacher's `upstream.rs` reqwest client construction
//! (pool sizing, timeouts, tcp_nodelay), adapted from a fixed pair of
//! upstream targets to an arbitrary node endpoint, plus `tokio-tungstenite`
//! for the WS leg.

use std::time::Duration;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::types::TlsMode;

/// Builds the shared outbound HTTP client used for benchmark probes and
/// node-facing REST calls, following the teacher's pooling discipline.
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("reqwest client builds")
}

fn scheme(tls: TlsMode) -> (&'static str, &'static str) {
    match tls {
        TlsMode::Managed => ("https", "wss"),
        TlsMode::None => ("http", "ws"),
    }
}

#[derive(Debug, serde::Serialize)]
struct FetchProbeReq<'a> {
    target_url: &'a str,
}

#[derive(Debug, serde::Deserialize)]
pub struct FetchProbeResult {
    pub latency_ms: f64,
    pub success: bool,
}

#[derive(Debug, serde::Serialize)]
struct CpuProbeReq {
    iterations: u64,
}

#[derive(Debug, serde::Deserialize)]
pub struct CpuProbeResult {
    pub hashes_per_second: f64,
}

#[derive(Debug, serde::Serialize)]
struct MemoryProbeReq {
    megabytes: u64,
}

#[derive(Debug, serde::Deserialize)]
pub struct MemoryProbeResult {
    pub allocated: bool,
    pub elapsed_ms: f64,
}

/// Drives a single `/benchmark/fetch` probe against `target_url`.
pub async fn probe_fetch(
    client: &reqwest::Client,
    node_endpoint: &str,
    target_url: &str,
    timeout: Duration,
) -> Result<FetchProbeResult, reqwest::Error> {
    client
        .post(format!("{node_endpoint}/benchmark/fetch"))
        .timeout(timeout)
        .json(&FetchProbeReq { target_url })
        .send()
        .await?
        .json()
        .await
}

/// Drives the single `/benchmark/cpu` probe, asking for `iterations` SHA-256
/// rounds.
pub async fn probe_cpu(
    client: &reqwest::Client,
    node_endpoint: &str,
    iterations: u64,
    timeout: Duration,
) -> Result<CpuProbeResult, reqwest::Error> {
    client
        .post(format!("{node_endpoint}/benchmark/cpu"))
        .timeout(timeout)
        .json(&CpuProbeReq { iterations })
        .send()
        .await?
        .json()
        .await
}

/// Drives the single `/benchmark/memory-test` probe.
pub async fn probe_memory(
    client: &reqwest::Client,
    node_endpoint: &str,
    megabytes: u64,
    timeout: Duration,
) -> Result<MemoryProbeResult, reqwest::Error> {
    client
        .post(format!("{node_endpoint}/benchmark/memory-test"))
        .timeout(timeout)
        .json(&MemoryProbeReq { megabytes })
        .send()
        .await?
        .json()
        .await
}

/// Dials a node's `/ws-node` endpoint, carrying the session-identifying
/// headers the node needs to enforce its own accounting.
pub async fn dial_node_session(
    domain: &str,
    tls_mode: TlsMode,
    session_id: &str,
    model: &str,
    minutes: f64,
    megabytes: f64,
) -> Result<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    tokio_tungstenite::tungstenite::Error,
> {
    let (_, ws_scheme) = scheme(tls_mode);
    let url = format!("{ws_scheme}://{domain}/ws-node");
    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    headers.insert("x-session-id", HeaderValue::from_str(session_id).unwrap());
    headers.insert("x-model", HeaderValue::from_str(model).unwrap());
    headers.insert(
        "x-minutes",
        HeaderValue::from_str(&minutes.to_string()).unwrap(),
    );
    headers.insert(
        "x-megabytes",
        HeaderValue::from_str(&megabytes.to_string()).unwrap(),
    );
    let (stream, _response) = connect_async(request).await?;
    Ok(stream)
}

/// The node's HTTP endpoint for benchmark probes, derived from its declared
/// capabilities rather than its (possibly not-yet-provisioned) domain.
pub fn endpoint_from_capabilities(ipv6: &str, port: u16) -> String {
    format!("http://[{ipv6}]:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_wraps_ipv6_in_brackets() {
        let endpoint = endpoint_from_capabilities("fd00::1", 8080);
        assert_eq!(endpoint, "http://[fd00::1]:8080");
    }

    #[test]
    fn scheme_follows_tls_mode() {
        assert_eq!(scheme(TlsMode::None), ("http", "ws"));
        assert_eq!(scheme(TlsMode::Managed), ("https", "wss"));
    }
}
