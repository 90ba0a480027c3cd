//! Gateway error types.
//!
//! Three layers of failure flow through the gateway:
//!
//! - [`GatewayError`]: transport and infrastructure failures. Each variant
//!   maps to an HTTP status code and a structured JSON error body.
//! - [`RpcError`]: the error object carried inside a JSON-RPC response
//!   envelope. Always answered with HTTP 200.
//! - [`ApiError`]: what an application method returns. Recognized
//!   [`RpcError`]s pass through to the caller; anything else is logged and
//!   collapsed to a generic internal error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All non-RPC error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "unsupported content type",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`GatewayError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                |
/// |-----------|-----------------|----------------------------|
/// | 1000–1999 | Request shape   | 400 / 413                  |
/// | 2000–2999 | Admission       | 403 Forbidden              |
/// | 3000–3999 | Server          | 500 Internal Server Error  |
/// | 4000–4999 | Transport       | 500 Internal Server Error  |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request carried a content type the RPC endpoint does not accept.
    #[error("Bad request. Unsupported content type")]
    UnsupportedContentType,

    /// The request body could not be decoded.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request body or an uploaded file exceeded its size limit.
    #[error("payload too big: {0}")]
    PayloadTooLarge(String),

    /// The cross-origin policy rejected the request.
    #[error("CORS fail: {0}")]
    CorsRejected(String),

    /// Two APIs were bound under the same owner key.
    #[error("api registered twice: {0}")]
    DuplicateApi(String),

    /// Two registrations produced the same qualified method name.
    #[error("method registered twice: {0}")]
    DuplicateMethod(String),

    /// An endpoint was bound to a route that is taken or malformed.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    /// The connection's outbound queue is closed.
    #[error("connection {0} is closed")]
    ConnectionClosed(u64),

    /// The connection's outbound queue is full.
    #[error("outbound queue of connection {0} is full")]
    OutboundFull(u64),

    /// A WebSocket frame could not be interpreted as text.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Filesystem failure while handling uploads.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::UnsupportedContentType => 1001,
            Self::BadRequest(_) => 1002,
            Self::PayloadTooLarge(_) => 1003,
            Self::CorsRejected(_) => 2001,
            Self::DuplicateApi(_) => 3001,
            Self::DuplicateMethod(_) => 3002,
            Self::InvalidBinding(_) => 3005,
            Self::Io(_) => 3003,
            Self::Serialization(_) => 3004,
            Self::Internal(_) => 3000,
            Self::ConnectionClosed(_) => 4001,
            Self::OutboundFull(_) => 4002,
            Self::InvalidFrame(_) => 4003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedContentType | Self::BadRequest(_) | Self::InvalidFrame(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::CorsRejected(_) => StatusCode::FORBIDDEN,
            Self::DuplicateApi(_)
            | Self::DuplicateMethod(_)
            | Self::InvalidBinding(_)
            | Self::ConnectionClosed(_)
            | Self::OutboundFull(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Server-side failures never echo their cause to the client.
        let message = if status.is_server_error() {
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message,
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// JSON-RPC error object: `{ code, message, data? }`.
///
/// `message` carries the error kind name (e.g. `"METHOD_NOT_FOUND"`) and
/// `data` the optional human-readable detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    /// Numeric JSON-RPC error code.
    pub code: i64,
    /// Error kind name.
    pub message: String,
    /// Optional detail payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Code for malformed JSON or a structurally invalid envelope.
    pub const PARSE_ERROR: i64 = -32700;
    /// Code for an envelope that parsed but is not a valid request.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Code for an unknown or non-exported method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Code for params rejected by the method's validator.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Code for unrecognized failures inside a method.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Code for callers that ran out of rate-limit credits.
    pub const API_RATE_LIMIT_EXCEEDED: i64 = -32029;
    /// Code for methods that require an authenticated session.
    pub const UNAUTHORIZED: i64 = -32001;

    /// Creates an error with an arbitrary code and kind name.
    #[must_use]
    pub fn new(code: i64, name: impl Into<String>) -> Self {
        Self {
            code,
            message: name.into(),
            data: None,
        }
    }

    /// Attaches a detail payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<serde_json::Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// `PARSE_ERROR`, optionally with a detail message.
    #[must_use]
    pub fn parse_error(detail: Option<&str>) -> Self {
        let err = Self::new(Self::PARSE_ERROR, "PARSE_ERROR");
        match detail {
            Some(detail) => err.with_data(detail),
            None => err,
        }
    }

    /// `METHOD_NOT_FOUND`.
    #[must_use]
    pub fn method_not_found() -> Self {
        Self::new(Self::METHOD_NOT_FOUND, "METHOD_NOT_FOUND")
    }

    /// `INVALID_PARAMS` with the validator's message.
    #[must_use]
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, "INVALID_PARAMS").with_data(detail.into())
    }

    /// Generic `INTERNAL_ERROR` without any detail.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(Self::INTERNAL_ERROR, "INTERNAL_ERROR")
    }

    /// `API_RATE_LIMIT_EXCEEDED`.
    #[must_use]
    pub fn rate_limit_exceeded() -> Self {
        Self::new(Self::API_RATE_LIMIT_EXCEEDED, "API_RATE_LIMIT_EXCEEDED")
    }
}

/// Failure returned by an application method.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A recognized error kind, sent to the caller as-is.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Any other failure. Logged and surfaced as `INTERNAL_ERROR`.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Wraps an arbitrary error as an internal failure.
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(anyhow::Error::new(err))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_categories() {
        assert_eq!(
            GatewayError::UnsupportedContentType.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::CorsRejected("Invalid origin".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::PayloadTooLarge("file".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn cors_message_carries_reason() {
        let err = GatewayError::CorsRejected("Invalid origin".into());
        assert_eq!(err.to_string(), "CORS fail: Invalid origin");
    }

    #[test]
    fn rpc_error_serializes_without_empty_data() {
        let json = serde_json::to_value(RpcError::method_not_found()).ok();
        let Some(json) = json else {
            panic!("serialization failed");
        };
        assert_eq!(
            json,
            serde_json::json!({"code": -32601, "message": "METHOD_NOT_FOUND"})
        );
    }

    #[test]
    fn parse_error_keeps_detail() {
        let err = RpcError::parse_error(Some("Missing jsonRpc field"));
        assert_eq!(err.code, RpcError::PARSE_ERROR);
        assert_eq!(err.data, Some(serde_json::json!("Missing jsonRpc field")));
    }

    #[test]
    fn api_error_from_anyhow_is_internal() {
        let err: ApiError = anyhow::anyhow!("db exploded").into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
