//! Crate-wide error taxonomy (spec §7) with an `IntoResponse` translator for
//! HTTP and a close-frame translator for WebSocket sessions.

use axum::{
    Json,
    extract::ws::{CloseFrame, close_code},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("payment required")]
    PaymentRequired { descriptor: serde_json::Value },
    #[error("payment verification failed: {0}")]
    PaymentVerificationFailed(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("benchmark rejected: {0}")]
    PerformanceRejected(String),
    #[error("upstream unreachable: {message}")]
    UpstreamUnreachable {
        message: String,
        details: serde_json::Value,
    },
    #[error("upstream timeout")]
    UpstreamTimeout,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl GatewayError {
    fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::PaymentRequired { .. } => "payment_required",
            GatewayError::PaymentVerificationFailed(_) => "payment_verification_failed",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Gone(_) => "gone",
            GatewayError::PerformanceRejected(_) => "performance_rejected",
            GatewayError::UpstreamUnreachable { .. } => "upstream_unreachable",
            GatewayError::UpstreamTimeout => "upstream_timeout",
            GatewayError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            GatewayError::PaymentVerificationFailed(_) => StatusCode::PAYMENT_REQUIRED,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Gone(_) => StatusCode::GONE,
            GatewayError::PerformanceRejected(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(error = %self, %status, "request failed");
        if let GatewayError::PaymentRequired { descriptor } = &self {
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(descriptor.to_string());
            let body = ErrorBody {
                error: self.kind(),
                message: self.to_string(),
                details: None,
                timestamp: chrono::Utc::now(),
            };
            let mut resp = (status, Json(body)).into_response();
            if let Ok(value) = http::HeaderValue::from_str(&encoded) {
                resp.headers_mut().insert("PAYMENT-REQUIRED", value);
            }
            return resp;
        }
        let details = match &self {
            GatewayError::PaymentVerificationFailed(msg) => Some(json!({ "facilitator": msg })),
            GatewayError::UpstreamUnreachable { details, .. } => Some(details.clone()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            details,
            timestamp: chrono::Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

impl GatewayError {
    /// Transforms the error into a WebSocket close frame, following the same
    /// translator pattern used for HTTP responses.
    pub fn into_close_frame(self) -> CloseFrame {
        match self {
            GatewayError::Unauthorized(reason) => CloseFrame {
                code: close_code::POLICY,
                reason: reason.into(),
            },
            GatewayError::BadRequest(reason) => CloseFrame {
                code: close_code::INVALID,
                reason: reason.into(),
            },
            other => CloseFrame {
                code: close_code::ERROR,
                reason: other.to_string().into(),
            },
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
