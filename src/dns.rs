//! DNS provisioning adapter: get/set authoritative host records for the
//! zone the orchestrator manages. See spec §6 DNS interface.
//!
//! No direct pack precedent for DNS specifically; grounded on the general
//! REST-client construction idiom (teacher's `upstream.rs`) and on the same
//! boxed-future trait-object style used in `payment.rs` for consistency.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub hostname: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub address: String,
    pub ttl: u32,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The gateway always computes the full desired record set and submits it
/// in one call; providers must treat `replace_hosts` as idempotent and
/// atomic from the caller's perspective.
pub trait DnsProvider: Send + Sync {
    fn list_hosts(&self) -> BoxFuture<'_, Result<Vec<HostRecord>, String>>;
    fn replace_hosts<'a>(&'a self, records: Vec<HostRecord>) -> BoxFuture<'a, Result<(), String>>;
}

/// In-memory provider for local/dev mode: records live only for the
/// process lifetime, never touching a real zone.
pub struct InMemoryDnsProvider {
    records: std::sync::Mutex<Vec<HostRecord>>,
}

impl InMemoryDnsProvider {
    pub fn new() -> Self {
        Self { records: std::sync::Mutex::new(Vec::new()) }
    }
}

impl Default for InMemoryDnsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsProvider for InMemoryDnsProvider {
    fn list_hosts(&self) -> BoxFuture<'_, Result<Vec<HostRecord>, String>> {
        let snapshot = self.records.lock().unwrap().clone();
        Box::pin(async move { Ok(snapshot) })
    }

    fn replace_hosts<'a>(&'a self, records: Vec<HostRecord>) -> BoxFuture<'a, Result<(), String>> {
        *self.records.lock().unwrap() = records;
        Box::pin(async move { Ok(()) })
    }
}

/// HTTP-backed provider delegating to an external DNS management API.
pub struct HttpDnsProvider {
    client: reqwest::Client,
    base_url: String,
    zone: String,
}

impl HttpDnsProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, zone: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into(), zone: zone.into() }
    }
}

impl DnsProvider for HttpDnsProvider {
    fn list_hosts(&self) -> BoxFuture<'_, Result<Vec<HostRecord>, String>> {
        Box::pin(async move {
            self.client
                .get(format!("{}/zones/{}/records", self.base_url, self.zone))
                .send()
                .await
                .map_err(|e| e.to_string())?
                .json::<Vec<HostRecord>>()
                .await
                .map_err(|e| e.to_string())
        })
    }

    fn replace_hosts<'a>(&'a self, records: Vec<HostRecord>) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            self.client
                .put(format!("{}/zones/{}/records", self.base_url, self.zone))
                .json(&records)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }
}

/// Merges a node's records into the current set, replacing any prior AAAA/A
/// records for the same hostname and leaving every other hostname untouched.
pub fn merge_node_records(
    current: Vec<HostRecord>,
    hostname: &str,
    ipv6: &str,
    ipv4: Option<&str>,
    ttl: u32,
) -> Vec<HostRecord> {
    let mut out: Vec<HostRecord> = current
        .into_iter()
        .filter(|r| r.hostname != hostname)
        .collect();
    out.push(HostRecord {
        hostname: hostname.to_string(),
        record_type: RecordType::Aaaa,
        address: ipv6.to_string(),
        ttl,
    });
    if let Some(ipv4) = ipv4 {
        out.push(HostRecord {
            hostname: hostname.to_string(),
            record_type: RecordType::A,
            address: ipv4.to_string(),
            ttl,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_other_hosts_and_replaces_target() {
        let current = vec![
            HostRecord { hostname: "other.zone".into(), record_type: RecordType::Aaaa, address: "fd00::9".into(), ttl: 300 },
            HostRecord { hostname: "abc.zone".into(), record_type: RecordType::Aaaa, address: "fd00::1".into(), ttl: 300 },
        ];
        let merged = merge_node_records(current, "abc.zone", "fd00::2", Some("1.2.3.4"), 300);
        assert!(merged.iter().any(|r| r.hostname == "other.zone"));
        let abc: Vec<_> = merged.iter().filter(|r| r.hostname == "abc.zone").collect();
        assert_eq!(abc.len(), 2);
        assert!(abc.iter().any(|r| r.record_type == RecordType::Aaaa && r.address == "fd00::2"));
        assert!(abc.iter().any(|r| r.record_type == RecordType::A && r.address == "1.2.3.4"));
    }

    #[tokio::test]
    async fn in_memory_provider_roundtrips() {
        let provider = InMemoryDnsProvider::new();
        let records = vec![HostRecord {
            hostname: "x.zone".into(),
            record_type: RecordType::Aaaa,
            address: "fd00::5".into(),
            ttl: 300,
        }];
        provider.replace_hosts(records.clone()).await.unwrap();
        let listed = provider.list_hosts().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].address, "fd00::5");
    }
}
