//! HTTP endpoint table (spec §6), composed onto the axum `Router` the same
//! way the teacher wires `/payments`, `/healthz`, `/readyz`, `/metrics`.

use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use http::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;

use crate::error::GatewayError;
use crate::gateway::state::{AppState, SERVER_VERSION};
use crate::orchestrator::JoinSubmission;
use crate::payment::{PaymentPayload, build_descriptor};
use crate::router::RoutePreferences;
use crate::types::{JoinId, NodeId, PricingModel, SessionTokenId, SigAlg};

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "consensus-gateway",
        "version": SERVER_VERSION,
    }))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn stats(State(st): State<AppState>) -> impl IntoResponse {
    let (cached, paid) = st.dedup.stats();
    let router_stats = st.router.stats();
    let load_distribution: Vec<_> = st
        .router
        .load_distribution()
        .into_iter()
        .map(|(id, active_http, active_ws)| {
            json!({ "node_id": id.to_hex(), "active_http": active_http, "active_ws": active_ws })
        })
        .collect();
    Json(json!({
        "cache": { "entries": cached, "paid_marks": paid },
        "router": {
            "total_selections": router_stats.total_selections,
            "sticky_hits": router_stats.sticky_hits,
            "fallbacks": router_stats.fallbacks,
            "load_distribution": load_distribution,
        },
    }))
}

fn parse_alg(s: &str) -> Option<SigAlg> {
    match s {
        "secp256k1" => Some(SigAlg::Secp256k1),
        "ed25519" => Some(SigAlg::Ed25519),
        _ => None,
    }
}

async fn require_payment_or_verify(
    st: &AppState,
    headers: &HeaderMap,
    resource: &str,
    amount: &str,
) -> Result<(), GatewayError> {
    if st.cfg.local_mode {
        return Ok(());
    }
    let descriptor = build_descriptor(resource, amount, &st.cfg.pay_to_evm, &st.cfg.pay_to_solana);
    let Some(header) = headers.get("x-payment") else {
        return Err(GatewayError::PaymentRequired {
            descriptor: serde_json::to_value(&descriptor).unwrap(),
        });
    };
    let payload: PaymentPayload = serde_json::from_slice(header.as_bytes())
        .map_err(|e| GatewayError::BadRequest(format!("malformed x-payment header: {e}")))?;
    let result = st
        .facilitator
        .verify_payment(&payload, &descriptor)
        .await
        .map_err(GatewayError::PaymentVerificationFailed)?;
    if !result.approved {
        return Err(GatewayError::PaymentVerificationFailed(
            result.reason.unwrap_or_else(|| "rejected".into()),
        ));
    }
    let _ = st.facilitator.settle_payment(&result).await;
    Ok(())
}

#[derive(Deserialize)]
pub struct ProxyRequest {
    pub target_url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<std::collections::HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

pub async fn proxy(
    State(st): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProxyRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let fingerprint = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("missing x-idempotency-key".into()))?
        .to_string();

    if let Some(cached) = st.dedup.cached(&fingerprint) {
        return Ok(render_proxy_response(cached, true, 0, &headers, &fingerprint));
    }

    if !st.dedup.is_paid(&fingerprint) {
        require_payment_or_verify(&st, &headers, "/proxy", "100").await?;
    }

    let method: Method = req
        .method
        .as_deref()
        .unwrap_or("GET")
        .parse()
        .map_err(|_| GatewayError::BadRequest("unsupported method".into()))?;

    let mut forward_headers = http::HeaderMap::new();
    if let Some(map) = &req.headers {
        for (k, v) in map {
            if let (Ok(name), Ok(value)) = (
                http::HeaderName::try_from(k.as_str()),
                http::HeaderValue::try_from(v.as_str()),
            ) {
                forward_headers.insert(name, value);
            }
        }
    }
    if req.body.as_ref().is_some_and(|b| b.is_object()) && !forward_headers.contains_key(CONTENT_TYPE) {
        forward_headers.insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
    }

    let started = Instant::now();
    let outcome = st.dedup.handle(&fingerprint, method, &req.target_url, forward_headers, req.body).await?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    Ok(render_proxy_response(outcome.response, outcome.cached, elapsed_ms, &headers, &fingerprint))
}

fn render_proxy_response(
    response: crate::dedup::cache::CachedResponse,
    cached: bool,
    processing_time_ms: u64,
    headers: &HeaderMap,
    fingerprint: &str,
) -> Json<serde_json::Value> {
    let verbose = headers.get("x-verbose").and_then(|v| v.to_str().ok()) == Some("true");
    let mut body = json!({
        "status": response.status,
        "statusText": response.status_text,
        "headers": response.headers,
        "data": response.data,
        "cached": cached,
        "payment_required": false,
    });
    if verbose {
        body["billing"] = json!({
            "cost": 0,
            "reason": if cached { "cache_hit" } else { "dispatched" },
            "idempotency_key": fingerprint,
            "processing_time_ms": processing_time_ms,
        });
        body["meta"] = json!({
            "timestamp": chrono::Utc::now(),
            "server_version": SERVER_VERSION,
        });
    }
    Json(body)
}

#[derive(Deserialize)]
pub struct WsTokenQuery {
    pub model: String,
    pub minutes: Option<f64>,
    pub megabytes: Option<f64>,
}

pub async fn issue_ws_token(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<WsTokenQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let model = match q.model.as_str() {
        "time" => PricingModel::Time,
        "data" => PricingModel::Data,
        "hybrid" => PricingModel::Hybrid,
        _ => return Err(GatewayError::BadRequest("unknown pricing model".into())),
    };
    let minutes = q.minutes.unwrap_or(0.0);
    let megabytes = q.megabytes.unwrap_or(0.0);

    let issued = st.sessions.issue_token(model, minutes, megabytes);
    require_payment_or_verify(&st, &headers, "/ws", &issued.cost.to_string()).await?;

    Ok(Json(json!({
        "token": issued.token.id.to_hex(),
        "connect_url": "/ws-connect",
        "expires_in": 60,
    })))
}

#[derive(Deserialize)]
pub struct JoinBody {
    pub pubkey_hex: String,
    pub alg: String,
    pub ipv6: String,
    #[serde(default)]
    pub ipv4: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub test_endpoint: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    pub evm_address: String,
    pub solana_address: String,
    #[serde(default)]
    pub region: Option<String>,
}

fn join_submission(body: JoinBody) -> Result<JoinSubmission, GatewayError> {
    let alg = parse_alg(&body.alg).ok_or_else(|| GatewayError::BadRequest("unknown alg".into()))?;
    let pubkey_der = hex::decode(&body.pubkey_hex)
        .map_err(|_| GatewayError::BadRequest("pubkey_hex is not valid hex".into()))?;
    Ok(JoinSubmission {
        pubkey_der,
        alg,
        ipv6: body.ipv6,
        ipv4: body.ipv4,
        port: body.port,
        test_endpoint: body.test_endpoint,
        evm_address: body.evm_address,
        solana_address: body.solana_address,
        region: body.region.unwrap_or_else(|| "unspecified".into()),
    })
}

pub async fn node_join(
    State(st): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<JoinBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let price = st.orchestrator.admission_price().await?;
    require_payment_or_verify(&st, &headers, "/node/join", &price.to_string()).await?;

    let submission = join_submission(body)?;
    let node = st.orchestrator.join_singleshot(submission).await?;
    Ok(Json(json!({
        "node_id": node.id.to_hex(),
        "domain": node.domain,
        "status": node.status,
        "benchmark_score": node.capabilities.benchmark_score,
    })))
}

pub async fn node_join_challenge(
    State(st): State<AppState>,
    Json(body): Json<JoinBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let submission = join_submission(body)?;
    let (join_id, nonce) = st.orchestrator.join_challenge(submission).await?;
    Ok(Json(json!({
        "join_id": join_id.to_hex(),
        "nonce": hex::encode(nonce),
    })))
}

#[derive(Deserialize)]
pub struct VerifyJoinBody {
    pub signature_hex: String,
}

pub async fn node_verify_join(
    State(st): State<AppState>,
    Path(join_id_hex): Path<String>,
    Json(body): Json<VerifyJoinBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let join_id = JoinId::from_hex(&join_id_hex).ok_or_else(|| GatewayError::BadRequest("bad join_id".into()))?;
    let signature = hex::decode(&body.signature_hex)
        .map_err(|_| GatewayError::BadRequest("signature_hex is not valid hex".into()))?;
    let node = st.orchestrator.join_verify(&join_id, &signature).await?;
    Ok(Json(json!({
        "node_id": node.id.to_hex(),
        "domain": node.domain,
        "status": node.status,
        "benchmark_score": node.capabilities.benchmark_score,
    })))
}

#[derive(Deserialize)]
pub struct HeartbeatBody {
    pub rps: f64,
    pub p95_ms: f64,
    pub version: String,
}

pub async fn node_heartbeat(
    State(st): State<AppState>,
    Path(node_id_hex): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let node_id = NodeId::from_hex(&node_id_hex).ok_or_else(|| GatewayError::BadRequest("bad node_id".into()))?;
    let update = st.orchestrator.heartbeat(&node_id, body.rps, body.p95_ms, body.version).await?;
    Ok(match update {
        Some((version, release_url)) => Json(json!({
            "update_available": { "version": version, "github_release_url": release_url },
        })),
        None => Json(json!({})),
    })
}

pub async fn node_status(
    State(st): State<AppState>,
    Path(node_id_hex): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let node_id = NodeId::from_hex(&node_id_hex).ok_or_else(|| GatewayError::BadRequest("bad node_id".into()))?;
    let node = st.orchestrator.get_node(&node_id).await?.ok_or_else(|| GatewayError::NotFound("unknown node".into()))?;
    Ok(Json(node))
}

pub async fn list_nodes(State(st): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    let nodes = st.orchestrator.list_nodes().await?;
    Ok(Json(nodes))
}

pub async fn latest_manifest(State(st): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    let manifest = st.orchestrator.get_required_manifest().await?;
    Ok(Json(manifest))
}

#[derive(Deserialize)]
pub struct VerifyIntegrityBody {
    pub version: String,
    pub platform: String,
    pub build_digest: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature_hex: String,
}

pub async fn verify_integrity(
    State(st): State<AppState>,
    Path(node_id_hex): Path<String>,
    Json(body): Json<VerifyIntegrityBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let node_id = NodeId::from_hex(&node_id_hex).ok_or_else(|| GatewayError::BadRequest("bad node_id".into()))?;
    let signature = hex::decode(&body.signature_hex)
        .map_err(|_| GatewayError::BadRequest("signature_hex is not valid hex".into()))?;
    let verified = st
        .orchestrator
        .verify_integrity(&node_id, &body.version, &body.platform, &body.build_digest, body.timestamp, &body.nonce, &signature)
        .await?;
    Ok(Json(json!({ "verified": verified })))
}

#[derive(Deserialize)]
pub struct ManifestUploadBody {
    pub version: String,
    pub manifest: serde_json::Value,
    pub release_url: String,
    pub required: bool,
    pub signature_hex: String,
}

pub async fn admin_upload_manifest(
    State(st): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ManifestUploadBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let admin_key = st.cfg.admin_key.as_deref();
    let provided = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
    match (admin_key, provided) {
        (Some(expected), Some(got)) if expected == got => {}
        _ => return Err(GatewayError::Unauthorized("missing or invalid x-admin-key".into())),
    }
    let signature = hex::decode(&body.signature_hex)
        .map_err(|_| GatewayError::BadRequest("signature_hex is not valid hex".into()))?;
    st.orchestrator
        .upload_manifest(body.version, body.manifest, body.release_url, body.required, signature)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct WsConnectQuery {
    pub token: String,
}

/// Phase B of the two-phase handshake: looks up and consumes the
/// SessionToken issued by `issue_ws_token` atomically, then upgrades.
/// Invalid/expired/consumed tokens are rejected with 401 before the
/// upgrade completes, per spec §4.3.
pub async fn ws_connect(
    State(st): State<AppState>,
    Query(q): Query<WsConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, GatewayError> {
    let token_id = SessionTokenId::from_hex(&q.token)
        .ok_or_else(|| GatewayError::Unauthorized("malformed session token".into()))?;
    let token = st
        .sessions
        .consume_token(&token_id)
        .ok_or_else(|| GatewayError::Unauthorized("invalid, expired, or already-consumed session token".into()))?;

    let preferences = RoutePreferences::from_headers(&headers);
    let session_id = uuid::Uuid::new_v4().to_string();
    let sessions = st.sessions.clone();

    Ok(ws.on_upgrade(move |socket| async move {
        sessions.run_session(socket, &session_id, &token, &preferences).await;
    }))
}
