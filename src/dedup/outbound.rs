//! Outbound HTTP dispatch for the dedup proxy: client construction, header
//! cleansing, manual content-encoding decompression, and response
//! materialization. See spec §4.1.
//!
//! Grounded on the teacher's `upstream.rs` client-construction idiom
//! (pool sizing/timeouts), with auto-decompression disabled so the
//! content-encoding branching the spec describes is explicit rather than
//! hidden inside reqwest.

use std::io::Read;
use std::time::Duration;

use chrono::Utc;
use http::Method;

use crate::dedup::cache::CachedResponse;

const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "connection",
    "x-idempotency-key",
    "x-payment",
    "x-verbose",
];

pub fn build_client(timeout: Duration, max_redirects: usize) -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(max_redirects))
        .no_gzip()
        .no_deflate()
        .no_brotli()
        .build()
        .expect("reqwest client builds")
}

fn has_body(method: &Method) -> bool {
    matches!(*method, Method::PUT | Method::POST | Method::PATCH)
}

/// Cleanses client-supplied headers before forwarding, per spec §4.1.
pub fn cleanse_headers(headers: &http::HeaderMap) -> http::HeaderMap {
    let mut out = http::HeaderMap::new();
    for (name, value) in headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if STRIPPED_REQUEST_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    out
}

fn decompress(encoding: Option<&str>, bytes: &[u8]) -> Result<Vec<u8>, String> {
    match encoding.map(|s| s.to_ascii_lowercase()) {
        Some(enc) if enc == "gzip" => {
            let mut decoder = flate2::read::GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| e.to_string())?;
            Ok(out)
        }
        Some(enc) if enc == "deflate" => {
            let mut decoder = flate2::read::DeflateDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| e.to_string())?;
            Ok(out)
        }
        Some(enc) if enc == "br" => {
            let mut out = Vec::new();
            brotli::BrotliDecompress(&mut std::io::Cursor::new(bytes), &mut out)
                .map_err(|e| e.to_string())?;
            Ok(out)
        }
        _ => Ok(bytes.to_vec()),
    }
}

fn parse_body(bytes: &[u8]) -> serde_json::Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string())),
        Err(_) => serde_json::Value::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            bytes,
        )),
    }
}

/// Dispatches one outbound call. Returns `Ok(CachedResponse)` for any
/// response the upstream actually produced (including 4xx/5xx), and `Err`
/// only for transport-layer faults (DNS/connect/timeout) that must not
/// pollute the cache.
pub async fn dispatch(
    client: &reqwest::Client,
    method: &Method,
    target_url: &str,
    headers: http::HeaderMap,
    body: Option<serde_json::Value>,
) -> Result<CachedResponse, String> {
    let mut request = client.request(method.clone(), target_url).headers(headers.clone());

    if has_body(method) {
        if let Some(body) = &body {
            let content_type_set = headers.contains_key(http::header::CONTENT_TYPE);
            request = if body.is_object() || body.is_array() {
                if content_type_set {
                    request.body(body.to_string())
                } else {
                    request.json(body)
                }
            } else if let Some(s) = body.as_str() {
                request.body(s.to_string())
            } else {
                request.json(body)
            };
        }
    }

    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or("").to_string();
    let encoding = response
        .headers()
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let response_headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter(|(name, _)| *name != http::header::CONTENT_ENCODING)
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let raw = response.bytes().await.map_err(|e| e.to_string())?;
    let decompressed = decompress(encoding.as_deref(), &raw)?;
    let data = parse_body(&decompressed);

    Ok(CachedResponse {
        status: status.as_u16(),
        status_text,
        headers: response_headers,
        data,
        captured_at: Utc::now(),
    })
}

/// Synthesizes a response for a transport-layer failure. Per spec §4.1,
/// this shape is NEVER cached, unlike a genuine upstream error status.
pub fn synthetic_error_response(url: &str, message: &str, code: &str) -> serde_json::Value {
    serde_json::json!({
        "status": 500,
        "data": {
            "error": "upstream_unreachable",
            "message": message,
            "code": code,
            "url": url,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanse_strips_case_insensitively() {
        let mut headers = http::HeaderMap::new();
        headers.insert("X-Idempotency-Key", http::HeaderValue::from_static("abc"));
        headers.insert("accept", http::HeaderValue::from_static("application/json"));
        let cleaned = cleanse_headers(&headers);
        assert!(!cleaned.contains_key("x-idempotency-key"));
        assert!(cleaned.contains_key("accept"));
    }

    #[test]
    fn parse_body_falls_back_to_raw_string() {
        let value = parse_body(b"not json");
        assert_eq!(value, serde_json::Value::String("not json".into()));
    }

    #[test]
    fn parse_body_prefers_json() {
        let value = parse_body(br#"{"a":1}"#);
        assert_eq!(value, serde_json::json!({"a": 1}));
    }
}
