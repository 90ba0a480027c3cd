//! Axum entry point for WebSocket upgrades.
//!
//! [`upgrade_interceptor`] sits in front of the router so that an upgrade
//! on any path reaches the connection manager, including paths that also
//! carry HTTP routes. The manager decides whether a handler owns the path;
//! the CORS policy is checked before the handshake completes.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONNECTION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::manager::reject_upgrade;
use crate::api::middleware::is_websocket_upgrade;
use crate::app_state::AppState;
use crate::domain::CorsDecision;

/// Hands WebSocket upgrades to [`ws_upgrade_handler`] and everything else
/// to the router.
pub async fn upgrade_interceptor(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_websocket_upgrade(request.headers()) {
        ws_upgrade_handler(state, request).await
    } else {
        next.run(request).await
    }
}

/// Upgrades the request to a WebSocket owned by the matching path handler.
///
/// Paths without a handler get `404 Not Found` and the HTTP connection is
/// closed.
pub async fn ws_upgrade_handler(state: AppState, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let path = parts.uri.path().to_string();
    let Some(handler) = state.connections.match_handler(&path) else {
        tracing::debug!(path = %path, "no websocket handler for path");
        return (StatusCode::NOT_FOUND, [(CONNECTION, "close")]).into_response();
    };

    let ctx = state.contexts.for_request(&parts.extensions, &parts.headers);
    if let CorsDecision::Fail(reason) = state.cors.check(&parts.method, &parts.headers) {
        tracing::info!(address = %ctx.address(), path = %path, reason = %reason, "websocket cors rejection");
        return reject_upgrade(ws, format!("CORS fail: {reason}"));
    }

    state
        .connections
        .upgrade(ws, handler, &path, &parts.headers, ctx)
        .await
}
