//! Drives a candidate node through fetch/CPU/memory probes and computes a
//! composite admission score. See spec §4.4.1.

use std::time::Duration;

use crate::node_iface;

const FETCH_TARGETS: &[&str] = &[
    "https://example.org/",
    "https://example.com/",
    "https://httpbin.org/get",
    "https://www.iana.org/",
    "https://www.rfc-editor.org/",
];

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkScore {
    pub fetch: f64,
    pub cpu: f64,
    pub memory: f64,
    pub composite: f64,
}

impl BenchmarkScore {
    fn from_parts(fetch: f64, cpu: f64, memory: f64) -> Self {
        let composite = 0.6 * fetch + 0.25 * cpu + 0.15 * memory;
        Self { fetch, cpu, memory, composite }
    }
}

async fn fetch_score(client: &reqwest::Client, node_endpoint: &str, timeout: Duration) -> f64 {
    let mut latencies = Vec::with_capacity(FETCH_TARGETS.len());
    let mut successes = 0usize;
    for target in FETCH_TARGETS {
        let started = std::time::Instant::now();
        match node_iface::probe_fetch(client, node_endpoint, target, timeout).await {
            Ok(result) if result.success => {
                successes += 1;
                latencies.push(result.latency_ms);
            }
            _ => {
                latencies.push(started.elapsed().as_secs_f64() * 1000.0);
            }
        }
    }
    let avg_latency = latencies.iter().sum::<f64>() / latencies.len() as f64;
    let latency_score = (100.0 - avg_latency / 2000.0 * 100.0).max(0.0);
    let reliability_score = successes as f64 / FETCH_TARGETS.len() as f64 * 100.0;
    0.7 * latency_score + 0.3 * reliability_score
}

async fn cpu_score(client: &reqwest::Client, node_endpoint: &str, timeout: Duration) -> f64 {
    match node_iface::probe_cpu(client, node_endpoint, 5000, timeout).await {
        Ok(result) => (result.hashes_per_second / 5000.0 * 50.0).min(100.0),
        Err(_) => 0.0,
    }
}

async fn memory_score(client: &reqwest::Client, node_endpoint: &str, timeout: Duration) -> f64 {
    match node_iface::probe_memory(client, node_endpoint, 256, timeout).await {
        Ok(result) if result.allocated => {
            // Grading by allocation success and time: full marks under 1s,
            // tapering linearly to zero by 5s (the probe's own timeout).
            (100.0 - result.elapsed_ms / 5000.0 * 100.0).clamp(0.0, 100.0)
        }
        _ => 0.0,
    }
}

/// Runs all three probes against `node_endpoint` and returns the composite
/// score. Standalone pass threshold is 80; admission threshold is 60 (the
/// caller applies whichever is relevant).
pub async fn run_benchmark(
    client: &reqwest::Client,
    node_endpoint: &str,
    fetch_timeout: Duration,
    cpu_timeout: Duration,
) -> BenchmarkScore {
    let (fetch, cpu, memory) = tokio::join!(
        fetch_score(client, node_endpoint, fetch_timeout),
        cpu_score(client, node_endpoint, cpu_timeout),
        memory_score(client, node_endpoint, fetch_timeout),
    );
    BenchmarkScore::from_parts(fetch, cpu, memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_weights_sum_to_spec() {
        let score = BenchmarkScore::from_parts(100.0, 100.0, 100.0);
        assert!((score.composite - 100.0).abs() < 1e-9);
    }

    #[test]
    fn composite_weighs_fetch_most_heavily() {
        let fetch_only = BenchmarkScore::from_parts(100.0, 0.0, 0.0);
        let cpu_only = BenchmarkScore::from_parts(0.0, 100.0, 0.0);
        assert!(fetch_only.composite > cpu_only.composite);
    }
}
