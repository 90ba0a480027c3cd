//! Request interceptors applied to the whole router.
//!
//! - [`cors_middleware`]: evaluates the [`CorsPolicy`], rejects with `403`,
//!   decorates allowed cross-origin responses, and short-circuits
//!   preflights. WebSocket upgrades never reach it: the upgrade
//!   interceptor in front of it rejects them with a close code instead.
//! - [`context_middleware`]: resolves the caller's [`CallContext`] once and
//!   stores it in the request extensions.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{SET_COOKIE, UPGRADE};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::domain::{ContextFactory, CorsDecision, CorsPolicy};
use crate::error::GatewayError;

/// Returns `true` for a WebSocket upgrade request.
#[must_use]
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Cross-origin interceptor.
pub async fn cors_middleware(
    State(cors): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let is_preflight = request.method() == Method::OPTIONS;
    let allow_origin = match cors.check(request.method(), request.headers()) {
        CorsDecision::Fail(reason) => {
            tracing::info!(reason = %reason, uri = %request.uri(), "cors rejection");
            return GatewayError::CorsRejected(reason).into_response();
        }
        CorsDecision::Cors(origin) => Some(origin),
        CorsDecision::Success if is_preflight => Some(cors.base_origin().to_string()),
        CorsDecision::Success => None,
    };

    let mut response = if is_preflight && !cors.preflight_continue() {
        cors.options_success_status().into_response()
    } else {
        next.run(request).await
    };
    if let Some(origin) = allow_origin {
        cors.apply_headers(response.headers_mut(), &origin);
    }
    response
}

/// Installs the caller context and rolls the session cookie.
pub async fn context_middleware(
    State(contexts): State<ContextFactory>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = contexts.build(request.extensions(), request.headers());
    request.extensions_mut().insert(ctx.clone());
    let mut response = next.run(request).await;
    if let Some(cookie) = contexts.sessions().cookie_header(ctx.session().as_ref()) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}
