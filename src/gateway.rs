//! Gateway assembly.
//!
//! [`Gateway`] owns the shared components (rate limiter, CORS policy,
//! connection manager, context factory) and turns RPC bindings into one
//! Axum router:
//!
//! ```text
//! TraceLayer
//!   └── upgrade interceptor   (Upgrade: websocket on any path → PathHandler)
//!         └── CORS interceptor      (403 on failure)
//!               └── context interceptor
//!                     ├── /health, /api-docs
//!                     └── POST <http binding>   → HttpRpcEndpoint
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use chrono::Utc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::api::handlers::HttpRpcEndpoint;
use crate::api::middleware::{context_middleware, cors_middleware};
use crate::app_state::AppState;
use crate::config::GatewayConfig;
use crate::domain::{
    ClientIpResolver, ContextFactory, CorsPolicy, EventBus, MemorySessionStore, RateLimiter,
    SessionProvider,
};
use crate::error::GatewayError;
use crate::rpc::{MethodRegistry, RpcApi, RpcProcessor};
use crate::ws::handler::upgrade_interceptor;
use crate::ws::{Authorizer, ConnectionManager, PathHandler, WILDCARD_PATH, WsRpcEndpoint};

/// Routes served by the gateway itself.
const RESERVED_ROUTES: [&str; 3] = ["/health", "/api-docs/openapi.json", "/swagger-ui"];

/// A set of APIs to expose over HTTP.
#[derive(Debug)]
pub struct HttpBinding {
    path: String,
    apis: Vec<Arc<dyn RpcApi>>,
    limit_api: bool,
    prefix_api: bool,
}

impl HttpBinding {
    /// Binds `apis` at `/api` with rate limiting and name prefixes on.
    #[must_use]
    pub fn new(apis: Vec<Arc<dyn RpcApi>>) -> Self {
        Self {
            path: "/api".to_string(),
            apis,
            limit_api: true,
            prefix_api: true,
        }
    }

    /// Route of the endpoint.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Whether every request is charged against the caller's credits.
    #[must_use]
    pub const fn limit_api(mut self, limit_api: bool) -> Self {
        self.limit_api = limit_api;
        self
    }

    /// Whether methods are exposed as `api/method` or bare `method`.
    #[must_use]
    pub const fn prefix_api(mut self, prefix_api: bool) -> Self {
        self.prefix_api = prefix_api;
        self
    }
}

/// A set of APIs to expose over WebSocket. Method names are always
/// prefixed with the API name.
#[derive(Debug)]
pub struct WsBinding {
    path: String,
    apis: Vec<Arc<dyn RpcApi>>,
    limit_api: bool,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl WsBinding {
    /// Binds `apis` on every path with rate limiting on and no authorizer.
    #[must_use]
    pub fn new(apis: Vec<Arc<dyn RpcApi>>) -> Self {
        Self {
            path: WILDCARD_PATH.to_string(),
            apis,
            limit_api: true,
            authorizer: None,
        }
    }

    /// Exact upgrade path, or `*` for any.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Whether every message is charged against the caller's credits.
    #[must_use]
    pub const fn limit_api(mut self, limit_api: bool) -> Self {
        self.limit_api = limit_api;
        self
    }

    /// Check run on the upgrade request before the socket is accepted.
    #[must_use]
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }
}

/// Builder of the complete gateway router.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    state: AppState,
    router: Router<AppState>,
    routes: HashSet<String>,
}

impl Gateway {
    /// Creates a gateway with an in-memory session store.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let sessions = Arc::new(MemorySessionStore::new(config.session_cookie.clone()));
        Self::with_sessions(config, sessions)
    }

    /// Creates a gateway resolving sessions through `sessions`.
    #[must_use]
    pub fn with_sessions(config: GatewayConfig, sessions: Arc<dyn SessionProvider>) -> Self {
        let events = EventBus::new(config.lifecycle_bus_capacity);
        let state = AppState {
            connections: Arc::new(ConnectionManager::new(events, config.ws_outbound_buffer)),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            cors: Arc::new(CorsPolicy::new(config.cors.clone())),
            contexts: ContextFactory::new(ClientIpResolver::new(config.proxy.clone()), sessions),
            started_at: Utc::now(),
        };
        Self {
            config,
            state,
            router: Router::new(),
            routes: RESERVED_ROUTES.iter().map(|r| (*r).to_string()).collect(),
        }
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Shared state handed to the router.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// The WebSocket connection manager.
    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionManager> {
        &self.state.connections
    }

    /// The process-wide rate limiter.
    #[must_use]
    pub const fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.state.rate_limiter
    }

    /// The connection lifecycle event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        self.state.connections.events()
    }

    /// Exposes a set of APIs as a JSON-RPC over HTTP endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateApi`] or
    /// [`GatewayError::DuplicateMethod`] if the API set does not resolve
    /// to unique method names, and [`GatewayError::InvalidBinding`] if
    /// the route is malformed or already bound.
    pub fn bind_json_rpc_over_http(mut self, binding: HttpBinding) -> Result<Self, GatewayError> {
        if !binding.path.starts_with('/') {
            return Err(GatewayError::InvalidBinding(format!(
                "route must start with '/': {}",
                binding.path
            )));
        }
        if !self.routes.insert(binding.path.clone()) {
            return Err(GatewayError::InvalidBinding(format!(
                "route already bound: {}",
                binding.path
            )));
        }
        let registry = MethodRegistry::from_apis(binding.apis, binding.prefix_api)?;
        tracing::info!(
            path = %binding.path,
            methods = registry.len(),
            limit_api = binding.limit_api,
            "json-rpc over http bound"
        );
        let processor = Arc::new(RpcProcessor::new(registry.create_handler()));
        let endpoint = HttpRpcEndpoint::new(
            processor,
            Arc::clone(&self.state.rate_limiter),
            binding.limit_api,
            self.config.uploads.clone(),
            self.state.contexts.clone(),
        );
        self.router = self.router.merge(endpoint.into_router(&binding.path));
        Ok(self)
    }

    /// Exposes a set of APIs as a JSON-RPC over WebSocket path handler.
    ///
    /// Handlers are matched in binding order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateApi`] or
    /// [`GatewayError::DuplicateMethod`] if the API set does not resolve
    /// to unique method names.
    pub fn bind_json_rpc_over_websocket(self, binding: WsBinding) -> Result<Self, GatewayError> {
        let registry = MethodRegistry::from_apis(binding.apis, true)?;
        tracing::info!(
            path = %binding.path,
            methods = registry.len(),
            limit_api = binding.limit_api,
            authorized = binding.authorizer.is_some(),
            "json-rpc over websocket bound"
        );
        let processor = Arc::new(RpcProcessor::new(registry.create_handler()));
        let endpoint = WsRpcEndpoint::new(
            processor,
            Arc::clone(&self.state.rate_limiter),
            binding.limit_api,
        );
        let mut handler = PathHandler::new(binding.path, Arc::new(endpoint));
        if let Some(authorizer) = binding.authorizer {
            handler = handler.with_authorizer(authorizer);
        }
        self.state.connections.add_handler(handler);
        Ok(self)
    }

    /// Starts the credit replenisher and the WebSocket heartbeat.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.state.rate_limiter.spawn_replenisher(),
            self.state
                .connections
                .spawn_heartbeat(self.config.heartbeat_interval),
        ]
    }

    /// Assembles the router with the interceptors installed.
    ///
    /// The upgrade interceptor wraps the routed application, so it sees
    /// every request before route matching.
    pub fn into_router(self) -> Router {
        let state = self.state;
        let routed = self
            .router
            .merge(api::build_router())
            .layer(from_fn_with_state(state.contexts.clone(), context_middleware))
            .layer(from_fn_with_state(Arc::clone(&state.cors), cors_middleware))
            .with_state(state.clone());
        Router::new()
            .fallback_service(routed)
            .layer(from_fn_with_state(state, upgrade_interceptor))
            .layer(TraceLayer::new_for_http())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::error::ApiError;
    use crate::rpc::ApiModule;

    fn api(name: &str) -> Arc<dyn RpcApi> {
        let built = ApiModule::builder(name)
            .method("ping", |_ctx, _params: Value| async move {
                Ok::<_, ApiError>(Value::from("pong"))
            })
            .build();
        let Ok(module) = built else {
            panic!("build failed");
        };
        module
    }

    #[test]
    fn duplicate_api_names_fail_binding() {
        let result = Gateway::new(GatewayConfig::default())
            .bind_json_rpc_over_http(HttpBinding::new(vec![api("a"), api("a")]));
        assert!(matches!(result, Err(GatewayError::DuplicateApi(_))));
    }

    #[test]
    fn unprefixed_collisions_fail_binding() {
        let result = Gateway::new(GatewayConfig::default()).bind_json_rpc_over_http(
            HttpBinding::new(vec![api("a"), api("b")]).prefix_api(false),
        );
        assert!(matches!(result, Err(GatewayError::DuplicateMethod(_))));
    }

    #[test]
    fn websocket_bindings_are_always_prefixed() {
        let gateway = tokio_test::assert_ok!(
            Gateway::new(GatewayConfig::default())
                .bind_json_rpc_over_websocket(WsBinding::new(vec![api("a"), api("b")]))
        );
        assert_eq!(gateway.connections().handlers().len(), 1);
    }

    #[test]
    fn routes_cannot_be_bound_twice() {
        let Ok(gateway) = Gateway::new(GatewayConfig::default())
            .bind_json_rpc_over_http(HttpBinding::new(vec![api("a")]))
        else {
            panic!("first binding failed");
        };
        let again = gateway.bind_json_rpc_over_http(HttpBinding::new(vec![api("b")]));
        assert!(matches!(again, Err(GatewayError::InvalidBinding(_))));
    }

    #[test]
    fn reserved_and_relative_routes_are_rejected() {
        let health = Gateway::new(GatewayConfig::default())
            .bind_json_rpc_over_http(HttpBinding::new(vec![api("a")]).path("/health"));
        assert!(matches!(health, Err(GatewayError::InvalidBinding(_))));
        let relative = Gateway::new(GatewayConfig::default())
            .bind_json_rpc_over_http(HttpBinding::new(vec![api("a")]).path("rpc"));
        assert!(matches!(relative, Err(GatewayError::InvalidBinding(_))));
    }
}
