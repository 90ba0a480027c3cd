//! rpc-gateway server entry point.
//!
//! Binds the built-in APIs over HTTP and WebSocket and serves them.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use rpc_gateway::config::GatewayConfig;
use rpc_gateway::gateway::{Gateway, HttpBinding, WsBinding};
use rpc_gateway::service::builtin_apis;
use rpc_gateway::ws::BearerAuthorizer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting rpc-gateway");

    // Bind APIs
    let gateway = Gateway::new(config.clone());
    let apis = builtin_apis(gateway.connections())?;
    let mut ws_binding = WsBinding::new(apis.clone()).path(config.rpc_ws_path.clone());
    if let Some(token) = &config.ws_auth_token {
        ws_binding = ws_binding.authorizer(Arc::new(BearerAuthorizer::new(token.clone())));
    }
    let gateway = gateway
        .bind_json_rpc_over_http(HttpBinding::new(apis).path(config.rpc_http_path.clone()))?
        .bind_json_rpc_over_websocket(ws_binding)?;

    // Background tasks
    let tasks = gateway.spawn_background_tasks();
    let app = gateway.into_router();

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    for task in tasks {
        task.abort();
    }
    Ok(())
}
