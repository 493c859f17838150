//! Admission pricing and address validation for the node lifecycle
//! orchestrator. See spec §4.4.

use crate::types::NodeId;

pub const ADMISSION_BASE: u64 = 100;
pub const ADMISSION_INCREMENT: u64 = 50;
pub const ADMISSION_MAX: u64 = 1000;

/// `min(MAX_PRICE, BASE + active_nodes × INCREMENT)`.
pub fn admission_price(active_nodes: u64, base: u64, increment: u64, max: u64) -> u64 {
    (base + active_nodes.saturating_mul(increment)).min(max)
}

/// EVM address: `0x` followed by 40 hex characters.
pub fn is_valid_evm_address(addr: &str) -> bool {
    addr.len() == 42 && addr.starts_with("0x") && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Solana address: base58, 32-44 characters, decodes to 32 bytes.
pub fn is_valid_solana_address(addr: &str) -> bool {
    if !(32..=44).contains(&addr.len()) {
        return false;
    }
    matches!(bs58::decode(addr).into_vec(), Ok(bytes) if bytes.len() == 32)
}

pub fn generate_node_id() -> NodeId {
    NodeId::random()
}

/// `<id>.consensus.<zone>`, or `<id>.localhost` in local mode.
pub fn assign_domain(id: &NodeId, zone: &str, local_mode: bool) -> String {
    if local_mode {
        format!("{}.localhost", id.to_hex())
    } else {
        format!("{}.consensus.{}", id.to_hex(), zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_increases_with_active_nodes_and_caps() {
        assert_eq!(admission_price(0, ADMISSION_BASE, ADMISSION_INCREMENT, ADMISSION_MAX), 100);
        assert_eq!(admission_price(5, ADMISSION_BASE, ADMISSION_INCREMENT, ADMISSION_MAX), 350);
        assert_eq!(admission_price(1000, ADMISSION_BASE, ADMISSION_INCREMENT, ADMISSION_MAX), 1000);
    }

    #[test]
    fn evm_address_requires_40_hex_chars_after_prefix() {
        assert!(is_valid_evm_address("0x0000000000000000000000000000000000dead"));
        assert!(!is_valid_evm_address("0xdead"));
        assert!(!is_valid_evm_address("dead00000000000000000000000000000000000000"));
    }

    #[test]
    fn solana_address_must_decode_to_32_bytes() {
        let addr = bs58::encode([7u8; 32]).into_string();
        assert!(is_valid_solana_address(&addr));
        assert!(!is_valid_solana_address("not-base58!!!"));
    }

    #[test]
    fn domain_assignment_respects_local_mode() {
        let id = NodeId([1, 2, 3, 4, 5, 6]);
        assert_eq!(assign_domain(&id, "example.com", true), format!("{}.localhost", id.to_hex()));
        assert_eq!(assign_domain(&id, "example.com", false), format!("{}.consensus.example.com", id.to_hex()));
    }
}
