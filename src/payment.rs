//! Payment gate: a thin adapter over an external facilitator that decides
//! "required/paid/settled" for a resource+amount+chain tuple, plus 402
//! descriptor construction. See spec §6 payment protocol.
//!
//! Grounded on x402-rs's `paygate.rs` verify/settle contract, generalized
//! from its EVM/Solana facilitator split into a single trait with two
//! concrete adapters (local dev / HTTP-backed).

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// One accepted payment method advertised in a 402 descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOption {
    pub scheme: &'static str,
    pub network: &'static str,
    pub price: String,
    pub pay_to: String,
}

/// The full `PAYMENT-REQUIRED` descriptor body.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentDescriptor {
    pub x402_version: u32,
    pub resource: String,
    pub accepts: Vec<PaymentOption>,
    pub description: String,
    pub mime_type: &'static str,
}

/// Supported networks, per spec §6: an EVM testnet and an SVM devnet.
pub const EVM_NETWORK: &str = "eip155:84532";
pub const SOLANA_NETWORK: &str = "solana:devnet";

pub fn build_descriptor(resource: &str, amount: &str, pay_to_evm: &str, pay_to_sol: &str) -> PaymentDescriptor {
    PaymentDescriptor {
        x402_version: 1,
        resource: resource.to_string(),
        accepts: vec![
            PaymentOption {
                scheme: "exact",
                network: EVM_NETWORK,
                price: amount.to_string(),
                pay_to: pay_to_evm.to_string(),
            },
            PaymentOption {
                scheme: "exact",
                network: SOLANA_NETWORK,
                price: amount.to_string(),
                pay_to: pay_to_sol.to_string(),
            },
        ],
        description: format!("payment required for {resource}"),
        mime_type: "application/json",
    }
}

/// Payload carried by the client's `x-payment` header, opaque beyond its
/// JSON shape — the facilitator interprets scheme-specific fields.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentPayload {
    pub scheme: String,
    pub network: String,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub approved: bool,
    pub reason: Option<String>,
    pub settlement_id: String,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Verification and settlement, delegated to an external facilitator
/// through the contract named in spec §6. Kept as a trait object (boxed
/// futures, matching the pack's own dynamic-dispatch async style rather
/// than a proc-macro) so the gateway can swap a local always-approve stub
/// for development against a real on-chain facilitator in production.
pub trait PaymentFacilitator: Send + Sync {
    fn verify_payment<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        descriptor: &'a PaymentDescriptor,
    ) -> BoxFuture<'a, Result<VerifyResult, String>>;

    fn settle_payment<'a>(&'a self, verify_result: &'a VerifyResult) -> BoxFuture<'a, Result<(), String>>;
}

/// Always-approve facilitator for local/dev mode. Never reaches the network.
pub struct LocalFacilitator;

impl PaymentFacilitator for LocalFacilitator {
    fn verify_payment<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        _descriptor: &'a PaymentDescriptor,
    ) -> BoxFuture<'a, Result<VerifyResult, String>> {
        Box::pin(async move {
            Ok(VerifyResult {
                approved: true,
                reason: None,
                settlement_id: format!("local-{}", payload.network),
            })
        })
    }

    fn settle_payment<'a>(&'a self, _verify_result: &'a VerifyResult) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move { Ok(()) })
    }
}

/// Delegates verify/settle to an external RPC facilitator over HTTP.
pub struct HttpFacilitator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFacilitator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }
}

impl PaymentFacilitator for HttpFacilitator {
    fn verify_payment<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        descriptor: &'a PaymentDescriptor,
    ) -> BoxFuture<'a, Result<VerifyResult, String>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Req<'a> {
                payload: &'a PaymentPayload,
                requirements: &'a PaymentDescriptor,
            }
            #[derive(Deserialize)]
            struct Resp {
                approved: bool,
                reason: Option<String>,
                settlement_id: String,
            }
            let resp: Resp = self
                .client
                .post(format!("{}/verify", self.base_url))
                .json(&Req { payload, requirements: descriptor })
                .send()
                .await
                .map_err(|e| e.to_string())?
                .json()
                .await
                .map_err(|e| e.to_string())?;
            Ok(VerifyResult {
                approved: resp.approved,
                reason: resp.reason,
                settlement_id: resp.settlement_id,
            })
        })
    }

    fn settle_payment<'a>(&'a self, verify_result: &'a VerifyResult) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            self.client
                .post(format!("{}/settle", self.base_url))
                .json(&serde_json::json!({ "settlement_id": verify_result.settlement_id }))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_facilitator_always_approves() {
        let payload = PaymentPayload {
            scheme: "exact".into(),
            network: EVM_NETWORK.into(),
            extra: serde_json::json!({}),
        };
        let descriptor = build_descriptor("/proxy", "100", "0xabc", "sol-addr");
        let result = LocalFacilitator.verify_payment(&payload, &descriptor).await.unwrap();
        assert!(result.approved);
    }

    #[test]
    fn descriptor_advertises_both_networks() {
        let descriptor = build_descriptor("/ws", "50", "0xabc", "sol-addr");
        let networks: Vec<&str> = descriptor.accepts.iter().map(|o| o.network).collect();
        assert!(networks.contains(&EVM_NETWORK));
        assert!(networks.contains(&SOLANA_NETWORK));
    }
}
