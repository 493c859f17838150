//! Durable, single-process store for nodes, heartbeats, join requests, and
//! version manifests. See spec §4.5 / §6 persisted state.
//!
//! Grounded on `TaceoLabs-oprf-service`'s sqlx/sqlite convention: a pool,
//! embedded migrations, WAL journaling, and row structs that are translated
//! into domain types at the store boundary rather than derived directly on
//! them (the domain types carry enums/fixed arrays sqlx can't map for free).

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::types::{
    Capabilities, Heartbeat, JoinId, JoinRequest, Node, NodeId, NodeStatus, SigAlg, TlsMode,
    VersionManifest,
};

pub struct NodeStore {
    pool: SqlitePool,
}

fn alg_to_str(alg: SigAlg) -> &'static str {
    match alg {
        SigAlg::Secp256k1 => "secp256k1",
        SigAlg::Ed25519 => "ed25519",
    }
}

fn alg_from_str(s: &str) -> SigAlg {
    match s {
        "secp256k1" => SigAlg::Secp256k1,
        _ => SigAlg::Ed25519,
    }
}

fn status_to_str(s: NodeStatus) -> &'static str {
    match s {
        NodeStatus::Provisioning => "provisioning",
        NodeStatus::Active => "active",
        NodeStatus::Inactive => "inactive",
    }
}

fn status_from_str(s: &str) -> NodeStatus {
    match s {
        "active" => NodeStatus::Active,
        "inactive" => NodeStatus::Inactive,
        _ => NodeStatus::Provisioning,
    }
}

fn tls_to_str(t: TlsMode) -> &'static str {
    match t {
        TlsMode::None => "none",
        TlsMode::Managed => "managed",
    }
}

fn tls_from_str(s: &str) -> TlsMode {
    match s {
        "managed" => TlsMode::Managed,
        _ => TlsMode::None,
    }
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    pubkey_der: Vec<u8>,
    alg: String,
    region: String,
    ipv6: String,
    ipv4: Option<String>,
    port: i64,
    benchmark_score: Option<f64>,
    evm_address: Option<String>,
    solana_address: Option<String>,
    domain: String,
    tls_mode: String,
    status: String,
    verified: i64,
    software_version: Option<String>,
    build_digest: Option<String>,
    last_verified_at: Option<DateTime<Utc>>,
}

impl NodeRow {
    fn into_node(self, latest_heartbeat: Option<Heartbeat>) -> Node {
        Node {
            id: NodeId::from_hex(&self.id).expect("stored node id is valid hex"),
            pubkey_der: self.pubkey_der,
            alg: alg_from_str(&self.alg),
            region: self.region,
            capabilities: Capabilities {
                ipv6: self.ipv6,
                ipv4: self.ipv4,
                port: self.port as u16,
                benchmark_score: self.benchmark_score,
            },
            evm_address: self.evm_address,
            solana_address: self.solana_address,
            domain: self.domain,
            tls_mode: tls_from_str(&self.tls_mode),
            status: status_from_str(&self.status),
            verified: self.verified != 0,
            software_version: self.software_version,
            build_digest: self.build_digest,
            last_verified_at: self.last_verified_at,
            latest_heartbeat,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JoinRow {
    join_id: String,
    pubkey_der: Vec<u8>,
    alg: String,
    nonce: Vec<u8>,
    ipv6: String,
    ipv4: Option<String>,
    port: i64,
    test_endpoint: Option<String>,
    evm_address: String,
    solana_address: String,
    region: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
}

impl JoinRow {
    fn into_join(self) -> Option<JoinRequest> {
        let mut nonce = [0u8; 32];
        if self.nonce.len() != 32 {
            return None;
        }
        nonce.copy_from_slice(&self.nonce);
        Some(JoinRequest {
            join_id: JoinId::from_hex(&self.join_id)?,
            pubkey_der: self.pubkey_der,
            alg: alg_from_str(&self.alg),
            nonce,
            ipv6: self.ipv6,
            ipv4: self.ipv4,
            port: self.port as u16,
            test_endpoint: self.test_endpoint,
            evm_address: self.evm_address,
            solana_address: self.solana_address,
            region: self.region,
            created_at: self.created_at,
            expires_at: self.expires_at,
            consumed_at: self.consumed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ManifestRow {
    version: String,
    body: String,
    released_at: DateTime<Utc>,
    release_url: String,
    required: i64,
    signature: Vec<u8>,
}

impl ManifestRow {
    fn into_manifest(self) -> VersionManifest {
        VersionManifest {
            version: self.version,
            body: serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null),
            released_at: self.released_at,
            release_url: self.release_url,
            required: self.required != 0,
            signature: self.signature,
        }
    }
}

impl NodeStore {
    pub async fn connect(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn latest_heartbeat(&self, node_id: &str) -> Result<Option<Heartbeat>, sqlx::Error> {
        sqlx::query_as::<_, Heartbeat>(
            "SELECT node_id, rps, p95_ms, version, at FROM heartbeats \
             WHERE node_id = ?1 ORDER BY at DESC LIMIT 1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn upsert_node(&self, node: &Node) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO nodes (id, pubkey_der, alg, region, ipv6, ipv4, port, \
             benchmark_score, evm_address, solana_address, domain, tls_mode, status, \
             verified, software_version, build_digest, last_verified_at, created_at, updated_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?18) \
             ON CONFLICT(id) DO UPDATE SET \
             pubkey_der=excluded.pubkey_der, alg=excluded.alg, region=excluded.region, \
             ipv6=excluded.ipv6, ipv4=excluded.ipv4, port=excluded.port, \
             benchmark_score=excluded.benchmark_score, evm_address=excluded.evm_address, \
             solana_address=excluded.solana_address, domain=excluded.domain, \
             tls_mode=excluded.tls_mode, status=excluded.status, verified=excluded.verified, \
             software_version=excluded.software_version, build_digest=excluded.build_digest, \
             last_verified_at=excluded.last_verified_at, updated_at=excluded.updated_at",
        )
        .bind(node.id.to_hex())
        .bind(&node.pubkey_der)
        .bind(alg_to_str(node.alg))
        .bind(&node.region)
        .bind(&node.capabilities.ipv6)
        .bind(&node.capabilities.ipv4)
        .bind(node.capabilities.port as i64)
        .bind(node.capabilities.benchmark_score)
        .bind(&node.evm_address)
        .bind(&node.solana_address)
        .bind(&node.domain)
        .bind(tls_to_str(node.tls_mode))
        .bind(status_to_str(node.status))
        .bind(node.verified as i64)
        .bind(&node.software_version)
        .bind(&node.build_digest)
        .bind(node.last_verified_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, sqlx::Error> {
        let hex = id.to_hex();
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE id = ?1")
            .bind(&hex)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let hb = self.latest_heartbeat(&hex).await?;
                Ok(Some(row.into_node(hb)))
            }
            None => Ok(None),
        }
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>, sqlx::Error> {
        let rows = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let hb = self.latest_heartbeat(&row.id).await?;
            out.push(row.into_node(hb));
        }
        Ok(out)
    }

    pub async fn ipv6_in_use(&self, ipv6: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM nodes WHERE ipv6 = ?1")
            .bind(ipv6)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn set_domain(
        &self,
        id: &NodeId,
        domain: &str,
        tls_mode: TlsMode,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE nodes SET domain = ?1, tls_mode = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(domain)
            .bind(tls_to_str(tls_mode))
            .bind(Utc::now())
            .bind(id.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_heartbeat(&self, hb: &Heartbeat) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO heartbeats (node_id, rps, p95_ms, version, at) VALUES (?1,?2,?3,?4,?5)",
        )
        .bind(&hb.node_id)
        .bind(hb.rps)
        .bind(hb.p95_ms)
        .bind(&hb.version)
        .bind(hb.at)
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE nodes SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(&hb.node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_join_request(&self, join: &JoinRequest) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO join_requests (join_id, pubkey_der, alg, nonce, ipv6, ipv4, port, \
             test_endpoint, evm_address, solana_address, region, created_at, expires_at, consumed_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
        )
        .bind(join.join_id.to_hex())
        .bind(&join.pubkey_der)
        .bind(alg_to_str(join.alg))
        .bind(join.nonce.to_vec())
        .bind(&join.ipv6)
        .bind(&join.ipv4)
        .bind(join.port as i64)
        .bind(&join.test_endpoint)
        .bind(&join.evm_address)
        .bind(&join.solana_address)
        .bind(&join.region)
        .bind(join.created_at)
        .bind(join.expires_at)
        .bind(join.consumed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_join(&self, id: &JoinId) -> Result<Option<JoinRequest>, sqlx::Error> {
        let row = sqlx::query_as::<_, JoinRow>("SELECT * FROM join_requests WHERE join_id = ?1")
            .bind(id.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(JoinRow::into_join))
    }

    /// Consumes a join request, returning `Ok(Some(..))` only if it was not
    /// already consumed and has not expired. Idempotent-once by design: a
    /// second call against the same join_id finds `consumed_at` already set
    /// and returns `Ok(None)`.
    pub async fn consume_join(&self, id: &JoinId) -> Result<Option<JoinRequest>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, JoinRow>(
            "SELECT * FROM join_requests WHERE join_id = ?1 AND consumed_at IS NULL",
        )
        .bind(id.to_hex())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let Some(join) = row.into_join() else {
            tx.commit().await?;
            return Ok(None);
        };
        if join.expires_at < Utc::now() {
            tx.commit().await?;
            return Ok(None);
        }
        sqlx::query("UPDATE join_requests SET consumed_at = ?1 WHERE join_id = ?2")
            .bind(Utc::now())
            .bind(id.to_hex())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(join))
    }

    pub async fn update_node_verification(
        &self,
        id: &NodeId,
        software_version: &str,
        build_digest: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE nodes SET verified = 1, software_version = ?1, build_digest = ?2, \
             last_verified_at = ?3, updated_at = ?3 WHERE id = ?4",
        )
        .bind(software_version)
        .bind(build_digest)
        .bind(Utc::now())
        .bind(id.to_hex())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_node_verification(&self, id: &NodeId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE nodes SET verified = 0, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stores a manifest. When `required` is true, clears every other
    /// manifest's required flag in the same transaction so the
    /// at-most-one-required invariant always holds.
    pub async fn upsert_manifest(&self, manifest: &VersionManifest) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO version_manifests (version, body, released_at, release_url, required, signature) \
             VALUES (?1,?2,?3,?4,?5,?6) \
             ON CONFLICT(version) DO UPDATE SET \
             body=excluded.body, released_at=excluded.released_at, release_url=excluded.release_url, \
             required=excluded.required, signature=excluded.signature",
        )
        .bind(&manifest.version)
        .bind(manifest.body.to_string())
        .bind(manifest.released_at)
        .bind(&manifest.release_url)
        .bind(manifest.required as i64)
        .bind(&manifest.signature)
        .execute(&mut *tx)
        .await?;
        if manifest.required {
            sqlx::query("UPDATE version_manifests SET required = 0 WHERE version != ?1")
                .bind(&manifest.version)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_required_manifest(&self) -> Result<Option<VersionManifest>, sqlx::Error> {
        let row = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM version_manifests WHERE required = 1 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ManifestRow::into_manifest))
    }

    pub async fn get_manifest_by_version(
        &self,
        version: &str,
    ) -> Result<Option<VersionManifest>, sqlx::Error> {
        let row = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM version_manifests WHERE version = ?1",
        )
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ManifestRow::into_manifest))
    }

    pub async fn active_node_count(&self) -> Result<u64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nodes WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> NodeStore {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        NodeStore { pool }
    }

    fn sample_node() -> Node {
        Node {
            id: NodeId::random(),
            pubkey_der: vec![1, 2, 3],
            alg: SigAlg::Ed25519,
            region: "eu-west".into(),
            capabilities: Capabilities {
                ipv6: "fd00::1".into(),
                ipv4: None,
                port: 8080,
                benchmark_score: Some(91.0),
            },
            evm_address: None,
            solana_address: None,
            domain: "abc123.consensus.local".into(),
            tls_mode: TlsMode::None,
            status: NodeStatus::Active,
            verified: false,
            software_version: None,
            build_digest: None,
            last_verified_at: None,
            latest_heartbeat: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let store = memory_store().await;
        let node = sample_node();
        store.upsert_node(&node).await.unwrap();
        let fetched = store.get_node(&node.id).await.unwrap().unwrap();
        assert_eq!(fetched.domain, node.domain);
        assert_eq!(fetched.capabilities.ipv6, node.capabilities.ipv6);
    }

    #[tokio::test]
    async fn manifest_required_flag_is_exclusive() {
        let store = memory_store().await;
        let m1 = VersionManifest {
            version: "1.0.0".into(),
            body: serde_json::json!({"assets": []}),
            released_at: Utc::now(),
            release_url: "https://example/1.0.0".into(),
            required: true,
            signature: vec![9, 9],
        };
        let m2 = VersionManifest {
            required: true,
            version: "1.1.0".into(),
            ..m1.clone()
        };
        store.upsert_manifest(&m1).await.unwrap();
        store.upsert_manifest(&m2).await.unwrap();
        let required = store.get_required_manifest().await.unwrap().unwrap();
        assert_eq!(required.version, "1.1.0");
        let old = store.get_manifest_by_version("1.0.0").await.unwrap().unwrap();
        assert!(!old.required);
    }

    #[tokio::test]
    async fn consume_join_is_idempotent_once() {
        let store = memory_store().await;
        let join = JoinRequest {
            join_id: JoinId::random(),
            pubkey_der: vec![1],
            alg: SigAlg::Ed25519,
            nonce: [7u8; 32],
            ipv6: "fd00::2".into(),
            ipv4: None,
            port: 9000,
            test_endpoint: None,
            evm_address: "0x0000000000000000000000000000000000dead".into(),
            solana_address: "11111111111111111111111111111111".into(),
            region: "us-east".into(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(300),
            consumed_at: None,
        };
        store.create_join_request(&join).await.unwrap();
        let first = store.consume_join(&join.join_id).await.unwrap();
        assert!(first.is_some());
        let second = store.consume_join(&join.join_id).await.unwrap();
        assert!(second.is_none());
    }
}
