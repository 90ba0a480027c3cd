//! Envelope processing pipeline shared by both transports.
//!
//! [`RpcProcessor`] turns raw bytes, text or a parsed document into an
//! [`RpcResponse`]: parse, dispatch through the [`RpcHandler`], classify
//! failures, and emit one `rpc_stat` record per call. The rate-limit and
//! parse-error paths are metered the same way with `<unknown>` as method.

use std::time::{Duration, Instant};

use serde_json::Value;

use super::envelope::{RpcId, RpcRequest, RpcResponse};
use super::registry::RpcHandler;
use crate::domain::{CallContext, GUEST};
use crate::error::{ApiError, RpcError};

/// Method name recorded when the envelope could not be read.
pub const UNKNOWN_METHOD: &str = "<unknown>";

/// Transport-independent JSON-RPC processor.
#[derive(Debug, Clone)]
pub struct RpcProcessor {
    handler: RpcHandler,
}

impl RpcProcessor {
    /// Creates a processor dispatching through `handler`.
    #[must_use]
    pub const fn new(handler: RpcHandler) -> Self {
        Self { handler }
    }

    /// The dispatcher.
    #[must_use]
    pub const fn handler(&self) -> &RpcHandler {
        &self.handler
    }

    /// Processes a raw JSON body.
    pub async fn process_bytes(&self, ctx: &CallContext, body: &[u8]) -> RpcResponse {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => self.process_value(ctx, value).await,
            Err(err) => {
                tracing::warn!(address = %ctx.address(), error = %err, "malformed json-rpc body");
                self.parse_error(ctx, None)
            }
        }
    }

    /// Processes a JSON text.
    pub async fn process_str(&self, ctx: &CallContext, text: &str) -> RpcResponse {
        self.process_bytes(ctx, text.as_bytes()).await
    }

    /// Processes an already parsed document.
    pub async fn process_value(&self, ctx: &CallContext, value: Value) -> RpcResponse {
        match RpcRequest::from_value(value) {
            Ok(request) => self.dispatch(ctx, request).await,
            Err(err) => {
                tracing::warn!(address = %ctx.address(), error = %err, "invalid json-rpc envelope");
                self.reject(ctx, err)
            }
        }
    }

    /// `PARSE_ERROR` response with `id: null`.
    #[must_use]
    pub fn parse_error(&self, ctx: &CallContext, detail: Option<&str>) -> RpcResponse {
        self.reject(ctx, RpcError::parse_error(detail))
    }

    /// `API_RATE_LIMIT_EXCEEDED` response with `id: null`.
    #[must_use]
    pub fn rate_limit_exceeded(&self, ctx: &CallContext) -> RpcResponse {
        tracing::info!(address = %ctx.address(), "api rate limit exceeded");
        self.reject(ctx, RpcError::rate_limit_exceeded())
    }

    fn reject(&self, ctx: &CallContext, error: RpcError) -> RpcResponse {
        let started = Instant::now();
        record_stat(UNKNOWN_METHOD, &actor(ctx, None), false, started.elapsed());
        RpcResponse::error(RpcId::Null, error)
    }

    async fn dispatch(&self, ctx: &CallContext, request: RpcRequest) -> RpcResponse {
        let RpcRequest { id, method, params } = request;
        let caller = ctx.user_id();

        let started = Instant::now();
        let result = self.handler.call(ctx, &method, params).await;
        let elapsed = started.elapsed();

        let response = match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(ApiError::Rpc(err)) => RpcResponse::error(id, err),
            Err(ApiError::Internal(err)) => {
                tracing::error!(method = %method, error = ?err, "internal error during rpc call");
                RpcResponse::error(id, RpcError::internal())
            }
        };
        record_stat(&method, &actor(ctx, caller), response.is_success(), elapsed);
        response
    }
}

// The call itself may have established the session.
fn actor(ctx: &CallContext, before: Option<String>) -> String {
    before
        .or_else(|| ctx.user_id())
        .unwrap_or_else(|| GUEST.to_string())
}

fn record_stat(method: &str, actor: &str, success: bool, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    tracing::info!(target: "rpc_stat", method, actor, success, elapsed_ms, "api");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    use axum::http::HeaderMap;
    use serde_json::json;

    use super::*;
    use crate::domain::{MemorySessionStore, SessionProvider};
    use crate::rpc::{ApiModule, MethodRegistry, RpcApi};

    fn processor() -> RpcProcessor {
        let Ok(api) = ApiModule::builder("test")
            .method("echo", |_ctx, params| async move { Ok::<_, ApiError>(params) })
            .method("login", |ctx: CallContext, _params| async move {
                ctx.session().set_user_id(Some("dora".to_string()));
                Ok::<_, ApiError>(json!(true))
            })
            .method("boom", |_ctx, _params| async move {
                Err::<Value, _>(ApiError::from(anyhow::anyhow!("secret path /etc/x")))
            })
            .build()
        else {
            panic!("build failed");
        };
        let api: Arc<dyn RpcApi> = api;
        let Ok(registry) = MethodRegistry::from_apis([api], true) else {
            panic!("registry failed");
        };
        RpcProcessor::new(registry.create_handler())
    }

    fn ctx() -> CallContext {
        let store = MemorySessionStore::new("sid");
        CallContext::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            store.resolve(&HeaderMap::new()),
        )
    }

    #[tokio::test]
    async fn success_echoes_id() {
        let response = processor()
            .process_str(&ctx(), r#"{"jsonrpc":"2.0","id":5,"method":"test/echo","params":{"x":1}}"#)
            .await;
        assert_eq!(response.id, RpcId::from(5));
        assert_eq!(response.result(), Some(&json!({"x": 1})));
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error_with_null_id() {
        let response = processor().process_bytes(&ctx(), b"{not json").await;
        assert_eq!(response.id, RpcId::Null);
        let Some(err) = response.rpc_error() else {
            panic!("expected error");
        };
        assert_eq!(err.code, RpcError::PARSE_ERROR);
    }

    #[tokio::test]
    async fn invalid_envelope_is_parse_error() {
        let response = processor()
            .process_value(&ctx(), json!({"id": 9, "params": []}))
            .await;
        assert_eq!(response.id, RpcId::Null);
        assert_eq!(
            response.rpc_error().map(|e| e.code),
            Some(RpcError::PARSE_ERROR)
        );
    }

    #[tokio::test]
    async fn unknown_method_keeps_request_id() {
        let response = processor()
            .process_value(&ctx(), json!({"id": "q", "method": "test/missing"}))
            .await;
        assert_eq!(response.id, RpcId::from("q"));
        assert_eq!(
            response.rpc_error().map(|e| e.code),
            Some(RpcError::METHOD_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn internal_failures_do_not_leak() {
        let response = processor()
            .process_value(&ctx(), json!({"id": 1, "method": "test/boom"}))
            .await;
        let Some(err) = response.rpc_error() else {
            panic!("expected error");
        };
        assert_eq!(err, &RpcError::internal());
    }

    #[tokio::test]
    async fn session_established_by_call_is_visible() {
        let ctx = ctx();
        let response = processor()
            .process_value(&ctx, json!({"id": 1, "method": "test/login"}))
            .await;
        assert!(response.is_success());
        assert_eq!(actor(&ctx, None), "dora");
    }

    #[test]
    fn rate_limited_response_is_fixed() {
        let response = processor().rate_limit_exceeded(&ctx());
        assert_eq!(response.id, RpcId::Null);
        assert_eq!(response.rpc_error(), Some(&RpcError::rate_limit_exceeded()));
    }

    #[test]
    fn guests_are_recorded_as_guest() {
        assert_eq!(actor(&ctx(), None), GUEST);
    }
}
