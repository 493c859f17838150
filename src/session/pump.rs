//! Bidirectional, byte-accurate frame pump between a client WebSocket and
//! either a dialed worker node or a local echo fallback. See spec §4.3.
//!
//! Grounded on axum's own `ws.rs` extractor example for the split/select
//! frame-loop shape, adapted to forward frames onto a second leg (node
//! dial or self-echo) instead of processing them in place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as NodeMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::GatewayError;
use crate::types::SessionLimits;

pub enum NodeLink {
    Remote(WebSocketStream<MaybeTlsStream<TcpStream>>),
    LocalEcho,
}

pub struct SessionUsageCounters {
    pub bytes_rx: AtomicU64,
    pub bytes_tx: AtomicU64,
    pub bytes_total: AtomicU64,
}

impl SessionUsageCounters {
    pub fn new() -> Self {
        Self { bytes_rx: AtomicU64::new(0), bytes_tx: AtomicU64::new(0), bytes_total: AtomicU64::new(0) }
    }

    fn add_rx(&self, n: u64) -> u64 {
        self.bytes_rx.fetch_add(n, Ordering::Relaxed);
        self.bytes_total.fetch_add(n, Ordering::Relaxed) + n
    }

    fn add_tx(&self, n: u64) -> u64 {
        self.bytes_tx.fetch_add(n, Ordering::Relaxed);
        self.bytes_total.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn snapshot(&self) -> crate::types::SessionUsage {
        crate::types::SessionUsage {
            bytes_rx: self.bytes_rx.load(Ordering::Relaxed),
            bytes_tx: self.bytes_tx.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiredReason {
    TimeLimitReached,
    DataLimitReached,
}

fn message_len(msg: &Message) -> usize {
    match msg {
        Message::Text(t) => t.len(),
        Message::Binary(b) => b.len(),
        _ => 0,
    }
}

fn to_node_message(msg: Message) -> Option<NodeMessage> {
    match msg {
        Message::Text(t) => Some(NodeMessage::Text(t.to_string().into())),
        Message::Binary(b) => Some(NodeMessage::Binary(b)),
        _ => None,
    }
}

fn to_client_message(msg: NodeMessage) -> Option<Message> {
    match msg {
        NodeMessage::Text(t) => Some(Message::Text(t.to_string().into())),
        NodeMessage::Binary(b) => Some(Message::Binary(b)),
        _ => None,
    }
}

fn expired_frame(reason: ExpiredReason, usage: &crate::types::SessionUsage) -> Message {
    let reason_str = match reason {
        ExpiredReason::TimeLimitReached => "time_limit_reached",
        ExpiredReason::DataLimitReached => "data_limit_reached",
    };
    Message::Text(
        serde_json::json!({
            "type": "session_expired",
            "reason": reason_str,
            "final_usage": usage,
        })
        .to_string()
        .into(),
    )
}

pub fn session_start_frame(
    session_id: &str,
    model: crate::types::PricingModel,
    served_by: &str,
    limits: SessionLimits,
) -> Message {
    Message::Text(
        serde_json::json!({
            "type": "session_start",
            "session_id": session_id,
            "model": model,
            "served_by": served_by,
            "limits": limits,
        })
        .to_string()
        .into(),
    )
}

/// Runs the frame pump until a budget is exhausted or either side closes.
/// Frame order is preserved per direction; budget is checked after
/// accounting each frame's size, never before.
pub async fn run_pump(client: WebSocket, link: NodeLink, limits: SessionLimits) -> SessionUsageCounters {
    let usage = SessionUsageCounters::new();
    let (mut client_tx, mut client_rx) = client.split();
    let deadline = tokio::time::sleep(Duration::from_millis(limits.time_limit_ms));
    tokio::pin!(deadline);

    match link {
        NodeLink::Remote(remote) => {
            let (mut node_tx, mut node_rx) = remote.split();
            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        let _ = client_tx.send(expired_frame(ExpiredReason::TimeLimitReached, &usage.snapshot())).await;
                        let _ = client_tx.send(Message::Close(Some(CloseFrame { code: close_code::NORMAL, reason: "time_limit_reached".into() }))).await;
                        break;
                    }
                    client_frame = client_rx.next() => {
                        match client_frame {
                            Some(Ok(msg)) => {
                                if matches!(msg, Message::Close(_)) { break; }
                                let len = message_len(&msg) as u64;
                                let total = usage.add_rx(len);
                                if let Some(node_msg) = to_node_message(msg) {
                                    if node_tx.send(node_msg).await.is_err() { break; }
                                }
                                if total >= limits.data_limit_bytes {
                                    let _ = client_tx.send(expired_frame(ExpiredReason::DataLimitReached, &usage.snapshot())).await;
                                    let _ = client_tx.send(Message::Close(Some(CloseFrame { code: close_code::POLICY, reason: "data_limit_reached".into() }))).await;
                                    break;
                                }
                            }
                            _ => break,
                        }
                    }
                    node_frame = node_rx.next() => {
                        match node_frame {
                            Some(Ok(msg)) => {
                                let is_close = matches!(msg, NodeMessage::Close(_));
                                if is_close { break; }
                                if let Some(client_msg) = to_client_message(msg) {
                                    let len = message_len(&client_msg) as u64;
                                    let total = usage.add_tx(len);
                                    if client_tx.send(client_msg).await.is_err() { break; }
                                    if total >= limits.data_limit_bytes {
                                        let _ = client_tx.send(expired_frame(ExpiredReason::DataLimitReached, &usage.snapshot())).await;
                                        let _ = client_tx.send(Message::Close(Some(CloseFrame { code: close_code::POLICY, reason: "data_limit_reached".into() }))).await;
                                        break;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                let close = GatewayError::Internal(format!("node connection lost: {e}")).into_close_frame();
                                let _ = client_tx.send(Message::Close(Some(close))).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        }
        NodeLink::LocalEcho => {
            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        let _ = client_tx.send(expired_frame(ExpiredReason::TimeLimitReached, &usage.snapshot())).await;
                        let _ = client_tx.send(Message::Close(Some(CloseFrame { code: close_code::NORMAL, reason: "time_limit_reached".into() }))).await;
                        break;
                    }
                    client_frame = client_rx.next() => {
                        match client_frame {
                            Some(Ok(msg)) => {
                                if matches!(msg, Message::Close(_)) { break; }
                                let len = message_len(&msg) as u64;
                                let total = usage.add_rx(len);
                                if total >= limits.data_limit_bytes {
                                    let _ = client_tx.send(expired_frame(ExpiredReason::DataLimitReached, &usage.snapshot())).await;
                                    let _ = client_tx.send(Message::Close(Some(CloseFrame { code: close_code::POLICY, reason: "data_limit_reached".into() }))).await;
                                    break;
                                }
                                let echoed_len = len;
                                if client_tx.send(msg).await.is_err() { break; }
                                usage.add_tx(echoed_len);
                            }
                            _ => break,
                        }
                    }
                }
            }
        }
    }

    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_counters_accumulate_total_across_directions() {
        let usage = SessionUsageCounters::new();
        usage.add_rx(100);
        usage.add_tx(50);
        let snap = usage.snapshot();
        assert_eq!(snap.bytes_rx, 100);
        assert_eq!(snap.bytes_tx, 50);
        assert_eq!(snap.bytes_total, 150);
    }
}
