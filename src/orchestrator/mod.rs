//! Node lifecycle orchestrator: admission (both join shapes), benchmarking,
//! heartbeat, integrity attestation, and signed manifest distribution. See
//! spec §4.4.
//!
//! Grounded on the teacher's atomic-counter discipline (`breaker.rs`) for
//! the active-node-count pricing input, and on x402-rs's canonical
//! encode-then-verify signature structuring (`chain/evm.rs`), adapted from
//! EVM transfer authorizations to Ed25519/secp256k1 node identities.

pub mod admission;
pub mod benchmark;
pub mod manifest;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::dns::{DnsProvider, merge_node_records};
use crate::error::GatewayError;
use crate::node_iface;
use crate::store::NodeStore;
use crate::types::{
    Capabilities, Heartbeat, JoinId, JoinRequest, Node, NodeId, NodeStatus, SigAlg, TlsMode,
    VersionManifest,
};

pub struct OrchestratorConfig {
    pub dns_zone: String,
    pub local_mode: bool,
    pub join_request_ttl: Duration,
    pub admission_base_price: u64,
    pub admission_increment: u64,
    pub admission_max_price: u64,
    pub benchmark_admission_threshold: f64,
    pub benchmark_fetch_timeout: Duration,
    pub benchmark_cpu_timeout: Duration,
    pub attestation_skew: chrono::Duration,
    pub manifest_signing_pubkey: Option<[u8; 32]>,
}

pub struct JoinSubmission {
    pub pubkey_der: Vec<u8>,
    pub alg: SigAlg,
    pub ipv6: String,
    pub ipv4: Option<String>,
    pub port: u16,
    pub test_endpoint: Option<String>,
    pub evm_address: String,
    pub solana_address: String,
    pub region: String,
}

pub struct Orchestrator {
    store: Arc<NodeStore>,
    dns: Arc<dyn DnsProvider>,
    bench_client: reqwest::Client,
    cfg: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(store: Arc<NodeStore>, dns: Arc<dyn DnsProvider>, cfg: OrchestratorConfig) -> Self {
        Self { store, dns, bench_client: node_iface::build_client(), cfg }
    }

    pub async fn admission_price(&self) -> Result<u64, GatewayError> {
        let active = self.store.active_node_count().await?;
        Ok(admission::admission_price(
            active,
            self.cfg.admission_base_price,
            self.cfg.admission_increment,
            self.cfg.admission_max_price,
        ))
    }

    fn validate_submission(&self, join: &JoinSubmission) -> Result<(), GatewayError> {
        if !admission::is_valid_evm_address(&join.evm_address) {
            return Err(GatewayError::BadRequest("invalid evm_address".into()));
        }
        if !admission::is_valid_solana_address(&join.solana_address) {
            return Err(GatewayError::BadRequest("invalid solana_address".into()));
        }
        if join.ipv6.is_empty() {
            return Err(GatewayError::BadRequest("missing ipv6".into()));
        }
        Ok(())
    }

    /// Runs benchmark → DNS → store, in that order, committing nothing on
    /// any failure along the way.
    async fn admit(&self, join: &JoinSubmission) -> Result<Node, GatewayError> {
        self.validate_submission(join)?;

        if self.store.ipv6_in_use(&join.ipv6).await? {
            return Err(GatewayError::Conflict("ipv6 already registered".into()));
        }

        let node_endpoint = join
            .test_endpoint
            .clone()
            .unwrap_or_else(|| node_iface::endpoint_from_capabilities(&join.ipv6, join.port));
        let score = benchmark::run_benchmark(
            &self.bench_client,
            &node_endpoint,
            self.cfg.benchmark_fetch_timeout,
            self.cfg.benchmark_cpu_timeout,
        )
        .await;
        metrics::histogram!("orchestrator_benchmark_composite_score").record(score.composite);
        if score.composite < self.cfg.benchmark_admission_threshold {
            metrics::counter!("orchestrator_admission_total", "outcome" => "benchmark_rejected").increment(1);
            return Err(GatewayError::PerformanceRejected(format!(
                "composite score {:.1} below admission threshold {:.1}",
                score.composite, self.cfg.benchmark_admission_threshold
            )));
        }

        let node_id = admission::generate_node_id();
        let domain = admission::assign_domain(&node_id, &self.cfg.dns_zone, self.cfg.local_mode);

        let current_records = self
            .dns
            .list_hosts()
            .await
            .map_err(GatewayError::Internal)?;
        let desired = merge_node_records(current_records, &domain, &join.ipv6, join.ipv4.as_deref(), 300);
        self.dns
            .replace_hosts(desired)
            .await
            .map_err(GatewayError::Internal)?;

        let node = Node {
            id: node_id,
            pubkey_der: join.pubkey_der.clone(),
            alg: join.alg,
            region: join.region.clone(),
            capabilities: Capabilities {
                ipv6: join.ipv6.clone(),
                ipv4: join.ipv4.clone(),
                port: join.port,
                benchmark_score: Some(score.composite),
            },
            evm_address: Some(join.evm_address.clone()),
            solana_address: Some(join.solana_address.clone()),
            domain,
            tls_mode: TlsMode::None,
            status: NodeStatus::Active,
            verified: false,
            software_version: None,
            build_digest: None,
            last_verified_at: None,
            latest_heartbeat: None,
        };
        self.store.upsert_node(&node).await?;
        metrics::counter!("orchestrator_admission_total", "outcome" => "active").increment(1);
        Ok(node)
    }

    /// Single-shot join: payment (checked by the gateway before calling
    /// this), benchmark, DNS, store, in one call.
    pub async fn join_singleshot(&self, join: JoinSubmission) -> Result<Node, GatewayError> {
        self.admit(&join).await
    }

    /// Phase one of the two-step challenge/response join: stashes the
    /// submission behind a short-lived nonce, to be verified later.
    pub async fn join_challenge(&self, join: JoinSubmission) -> Result<(JoinId, [u8; 32]), GatewayError> {
        self.validate_submission(&join)?;
        if self.store.ipv6_in_use(&join.ipv6).await? {
            return Err(GatewayError::Conflict("ipv6 already registered".into()));
        }
        let mut nonce = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut nonce);
        let join_id = JoinId::random();
        let now = Utc::now();
        let request = JoinRequest {
            join_id,
            pubkey_der: join.pubkey_der,
            alg: join.alg,
            nonce,
            ipv6: join.ipv6,
            ipv4: join.ipv4,
            port: join.port,
            test_endpoint: join.test_endpoint,
            evm_address: join.evm_address,
            solana_address: join.solana_address,
            region: join.region,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.cfg.join_request_ttl).unwrap(),
            consumed_at: None,
        };
        self.store.create_join_request(&request).await?;
        Ok((join_id, nonce))
    }

    /// Phase two: verifies the detached signature over the nonce, consumes
    /// the join request, then runs the same benchmark → DNS → store path.
    pub async fn join_verify(&self, join_id: &JoinId, signature: &[u8]) -> Result<Node, GatewayError> {
        let request = self
            .store
            .get_join(join_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound("unknown join_id".into()))?;
        if request.expires_at < Utc::now() {
            return Err(GatewayError::Gone("join request expired".into()));
        }
        if !manifest::verify_signature(request.alg, &request.pubkey_der, &request.nonce, signature) {
            return Err(GatewayError::Unauthorized("signature verification failed".into()));
        }
        let consumed = self
            .store
            .consume_join(join_id)
            .await?
            .ok_or_else(|| GatewayError::Conflict("join request already consumed".into()))?;

        self.admit(&JoinSubmission {
            pubkey_der: consumed.pubkey_der,
            alg: consumed.alg,
            ipv6: consumed.ipv6,
            ipv4: consumed.ipv4,
            port: consumed.port,
            test_endpoint: consumed.test_endpoint,
            evm_address: consumed.evm_address,
            solana_address: consumed.solana_address,
            region: consumed.region,
        })
        .await
    }

    pub async fn heartbeat(
        &self,
        node_id: &NodeId,
        rps: f64,
        p95_ms: f64,
        version: String,
    ) -> Result<Option<(String, String)>, GatewayError> {
        let hb = Heartbeat { node_id: node_id.to_hex(), rps, p95_ms, version: version.clone(), at: Utc::now() };
        self.store.insert_heartbeat(&hb).await?;

        let Some(required) = self.store.get_required_manifest().await? else {
            return Ok(None);
        };
        if required.version != version {
            self.store.clear_node_verification(node_id).await?;
            return Ok(Some((required.version, required.release_url)));
        }
        Ok(None)
    }

    pub async fn verify_integrity(
        &self,
        node_id: &NodeId,
        version: &str,
        platform: &str,
        build_digest: &str,
        timestamp: i64,
        nonce: &str,
        signature: &[u8],
    ) -> Result<bool, GatewayError> {
        let now = Utc::now().timestamp();
        if (now - timestamp).abs() > self.cfg.attestation_skew.num_seconds() {
            return Err(GatewayError::BadRequest("attestation timestamp out of skew window".into()));
        }
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound("unknown node".into()))?;
        let message = manifest::attestation_message(version, platform, build_digest, timestamp, nonce);
        if !manifest::verify_signature(SigAlg::Ed25519, &node.pubkey_der, &message, signature) {
            self.store.clear_node_verification(node_id).await?;
            return Ok(false);
        }

        let manifest = self
            .store
            .get_manifest_by_version(version)
            .await?
            .ok_or_else(|| GatewayError::NotFound("no manifest for reported version".into()))?;
        let asset_matches = manifest
            .body
            .get("assets")
            .and_then(|assets| assets.as_array())
            .map(|assets| {
                assets.iter().any(|asset| {
                    asset.get("platform").and_then(|p| p.as_str()) == Some(platform)
                        && asset.get("sha256").and_then(|s| s.as_str()) == Some(build_digest)
                })
            })
            .unwrap_or(false);

        if asset_matches {
            self.store.update_node_verification(node_id, version, build_digest).await?;
        } else {
            self.store.clear_node_verification(node_id).await?;
        }
        Ok(asset_matches)
    }

    pub async fn upload_manifest(
        &self,
        version: String,
        body: serde_json::Value,
        release_url: String,
        required: bool,
        signature: Vec<u8>,
    ) -> Result<(), GatewayError> {
        let pinned = self
            .cfg
            .manifest_signing_pubkey
            .ok_or_else(|| GatewayError::Internal("no pinned manifest signing key configured".into()))?;

        let mut body_for_signing = body.clone();
        if let Some(obj) = body_for_signing.as_object_mut() {
            obj.remove("signature");
        }
        let message = manifest::manifest_message(&body_for_signing);
        if !manifest::verify_signature(SigAlg::Ed25519, &pinned, &message, &signature) {
            return Err(GatewayError::Unauthorized("manifest signature invalid".into()));
        }

        let record = VersionManifest { version, body, released_at: Utc::now(), release_url, required, signature };
        self.store.upsert_manifest(&record).await?;
        Ok(())
    }

    pub async fn get_required_manifest(&self) -> Result<Option<VersionManifest>, GatewayError> {
        Ok(self.store.get_required_manifest().await?)
    }

    pub async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, GatewayError> {
        Ok(self.store.get_node(id).await?)
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>, GatewayError> {
        Ok(self.store.list_nodes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::InMemoryDnsProvider;

    fn test_cfg() -> OrchestratorConfig {
        OrchestratorConfig {
            dns_zone: "example.com".into(),
            local_mode: true,
            join_request_ttl: Duration::from_secs(120),
            admission_base_price: 100,
            admission_increment: 50,
            admission_max_price: 1000,
            benchmark_admission_threshold: 60.0,
            benchmark_fetch_timeout: Duration::from_secs(5),
            benchmark_cpu_timeout: Duration::from_secs(10),
            attestation_skew: chrono::Duration::seconds(300),
            manifest_signing_pubkey: None,
        }
    }

    #[tokio::test]
    async fn duplicate_ipv6_is_rejected() {
        let store = Arc::new(NodeStore::connect(":memory:").await.unwrap());
        let dns = Arc::new(InMemoryDnsProvider::new());
        let orchestrator = Orchestrator::new(store.clone(), dns, test_cfg());

        let node = Node {
            id: NodeId::random(),
            pubkey_der: vec![1; 32],
            alg: SigAlg::Ed25519,
            region: "eu".into(),
            capabilities: Capabilities { ipv6: "fd00::1".into(), ipv4: None, port: 8080, benchmark_score: None },
            evm_address: None,
            solana_address: None,
            domain: "x.localhost".into(),
            tls_mode: TlsMode::None,
            status: NodeStatus::Active,
            verified: false,
            software_version: None,
            build_digest: None,
            last_verified_at: None,
            latest_heartbeat: None,
        };
        store.upsert_node(&node).await.unwrap();

        let join = JoinSubmission {
            pubkey_der: vec![2; 32],
            alg: SigAlg::Ed25519,
            ipv6: "fd00::1".into(),
            ipv4: None,
            port: 8081,
            test_endpoint: None,
            evm_address: "0x0000000000000000000000000000000000dead".into(),
            solana_address: bs58::encode([1u8; 32]).into_string(),
            region: "eu".into(),
        };
        let result = orchestrator.join_singleshot(join).await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));
    }

    #[tokio::test]
    async fn manifest_upload_requires_valid_signature() {
        let store = Arc::new(NodeStore::connect(":memory:").await.unwrap());
        let dns = Arc::new(InMemoryDnsProvider::new());
        use ed25519_dalek::SigningKey;
        use rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut OsRng);
        let mut cfg = test_cfg();
        cfg.manifest_signing_pubkey = Some(signing_key.verifying_key().to_bytes());
        let orchestrator = Orchestrator::new(store, dns, cfg);

        let result = orchestrator
            .upload_manifest(
                "1.0.0".into(),
                serde_json::json!({"assets": []}),
                "https://example/1.0.0".into(),
                true,
                vec![0u8; 64],
            )
            .await;
        assert!(matches!(result, Err(GatewayError::Unauthorized(_))));
    }
}
