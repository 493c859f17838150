//! Core data model shared across engines: fingerprints, node identity,
//! session tokens, manifests. See spec §3.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Opaque client-supplied idempotency token. The system never interprets it,
/// only uses it as an equality key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() { None } else { Some(Self(raw)) }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! hex_id {
    ($name:ident, $len:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn random() -> Self {
                let mut bytes = [0u8; $len];
                rand::rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Option<Self> {
                let bytes = hex::decode(s).ok()?;
                if bytes.len() != $len {
                    return None;
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(&bytes);
                Some(Self(out))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $name::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid hex id"))
            }
        }
    };
}

hex_id!(NodeId, 6);
hex_id!(JoinId, 8);
hex_id!(SessionTokenId, 32);

/// Signature algorithm a node's identity key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigAlg {
    Secp256k1,
    Ed25519,
}

/// Lifecycle status of an admitted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Provisioning,
    Active,
    Inactive,
}

/// A node's declared capabilities, captured at admission/heartbeat time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub ipv6: String,
    pub ipv4: Option<String>,
    pub port: u16,
    pub benchmark_score: Option<f64>,
}

/// The latest heartbeat reported by a node.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Heartbeat {
    pub node_id: String,
    pub rps: f64,
    pub p95_ms: f64,
    pub version: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// TLS termination mode assigned to a node's domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    None,
    Managed,
}

/// A fully admitted (or provisioning) worker node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub pubkey_der: Vec<u8>,
    pub alg: SigAlg,
    pub region: String,
    pub capabilities: Capabilities,
    pub evm_address: Option<String>,
    pub solana_address: Option<String>,
    pub domain: String,
    pub tls_mode: TlsMode,
    pub status: NodeStatus,
    pub verified: bool,
    pub software_version: Option<String>,
    pub build_digest: Option<String>,
    pub last_verified_at: Option<chrono::DateTime<chrono::Utc>>,
    pub latest_heartbeat: Option<Heartbeat>,
}

/// A short-lived binding of (pubkey, alg, nonce) to a join_id, consumed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub join_id: JoinId,
    pub pubkey_der: Vec<u8>,
    pub alg: SigAlg,
    pub nonce: [u8; 32],
    pub ipv6: String,
    pub ipv4: Option<String>,
    pub port: u16,
    pub test_endpoint: Option<String>,
    pub evm_address: String,
    pub solana_address: String,
    pub region: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub consumed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A signed description of a software release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionManifest {
    pub version: String,
    pub body: serde_json::Value,
    pub released_at: chrono::DateTime<chrono::Utc>,
    pub release_url: String,
    pub required: bool,
    pub signature: Vec<u8>,
}

/// Pricing model for a metered WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingModel {
    Time,
    Data,
    Hybrid,
}

/// A single-use token issued after a session's payment phase, consumed by
/// the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub id: SessionTokenId,
    pub model: PricingModel,
    pub minutes: f64,
    pub megabytes: f64,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Derived budget for a session: time and data limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionLimits {
    pub time_limit_ms: u64,
    pub data_limit_bytes: u64,
}

/// Live usage counters for an open session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionUsage {
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub bytes_total: u64,
}
