//! Shared application state injected into the router's own handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{ContextFactory, CorsPolicy, RateLimiter};
use crate::ws::ConnectionManager;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live WebSocket connections and their path handlers.
    pub connections: Arc<ConnectionManager>,
    /// Process-wide credit ledger.
    pub rate_limiter: Arc<RateLimiter>,
    /// Cross-origin policy, also checked before WebSocket handshakes.
    pub cors: Arc<CorsPolicy>,
    /// Caller context resolution.
    pub contexts: ContextFactory,
    /// Gateway start time.
    pub started_at: DateTime<Utc>,
}
