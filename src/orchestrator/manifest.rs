//! Canonical-JSON signing discipline, manifest distribution, and integrity
//! attestation verification. See spec §4.4 (manifest distribution,
//! integrity attestation).
//!
//! `pubkey_der` holds the node's raw public key bytes (32 bytes for
//! Ed25519, 33/65 for secp256k1) rather than a parsed ASN.1/SPKI structure.

use ed25519_dalek::{Signature as EdSignature, Verifier, VerifyingKey};
use k256::ecdsa::{Signature as K256Signature, VerifyingKey as K256VerifyingKey, signature::Verifier as _};
use serde_json::Value;

use crate::types::SigAlg;

/// Produces the canonical JSON encoding used for every signed payload in
/// this system: object keys sorted lexicographically at every nesting
/// level, no extraneous whitespace.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).expect("canonical value serializes")
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Verifies `signature` over `message` under the node's declared algorithm.
pub fn verify_signature(alg: SigAlg, pubkey: &[u8], message: &[u8], signature: &[u8]) -> bool {
    match alg {
        SigAlg::Ed25519 => {
            let Ok(key_bytes) = <[u8; 32]>::try_from(pubkey) else { return false };
            let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else { return false };
            let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else { return false };
            let sig = EdSignature::from_bytes(&sig_bytes);
            verifying_key.verify(message, &sig).is_ok()
        }
        SigAlg::Secp256k1 => {
            let Ok(verifying_key) = K256VerifyingKey::from_sec1_bytes(pubkey) else { return false };
            let Ok(sig) = K256Signature::try_from(signature) else { return false };
            verifying_key.verify(message, &sig).is_ok()
        }
    }
}

/// Signs a message with an Ed25519 key, used server-side for manifests and
/// verified client-side/node-side for attestations.
pub fn sign_ed25519(signing_key: &ed25519_dalek::SigningKey, message: &[u8]) -> Vec<u8> {
    use ed25519_dalek::Signer;
    signing_key.sign(message).to_bytes().to_vec()
}

/// Builds the canonical message signed for an integrity attestation: the
/// first five fields (version, platform, build_digest, timestamp, nonce)
/// in sorted key order, per spec §4.4.
pub fn attestation_message(version: &str, platform: &str, build_digest: &str, timestamp: i64, nonce: &str) -> Vec<u8> {
    let value = serde_json::json!({
        "version": version,
        "platform": platform,
        "build_digest": build_digest,
        "timestamp": timestamp,
        "nonce": nonce,
    });
    canonical_json(&value).into_bytes()
}

/// Builds the canonical message signed for a manifest upload: the manifest
/// body minus the `signature` field, keys in lexicographic order.
pub fn manifest_message(manifest_body_without_signature: &Value) -> Vec<u8> {
    canonical_json(manifest_body_without_signature).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_sorts_nested_keys() {
        let value = serde_json::json!({"b": 1, "a": {"z": 1, "y": 2}});
        let canonical = canonical_json(&value);
        assert_eq!(canonical, r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn ed25519_roundtrip_verifies() {
        use ed25519_dalek::SigningKey;
        use rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut OsRng);
        let message = b"hello world";
        let sig = sign_ed25519(&signing_key, message);
        let pubkey = signing_key.verifying_key().to_bytes();
        assert!(verify_signature(SigAlg::Ed25519, &pubkey, message, &sig));
    }

    #[test]
    fn tampered_message_fails_verification() {
        use ed25519_dalek::SigningKey;
        use rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut OsRng);
        let sig = sign_ed25519(&signing_key, b"original");
        let pubkey = signing_key.verifying_key().to_bytes();
        assert!(!verify_signature(SigAlg::Ed25519, &pubkey, b"tampered", &sig));
    }
}
