//! Explicit per-call context.
//!
//! Every RPC invocation receives a [`CallContext`] carrying the caller's
//! address and session, plus the owning connection when the call arrived
//! over WebSocket. Nothing is read from ambient request state.

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::{Extensions, HeaderMap};

use super::client_ip::ClientIpResolver;
use super::session::{SessionContext, SessionProvider};
use crate::ws::Connection;

/// Actor name recorded for callers without an authenticated session.
pub const GUEST: &str = "guest";

/// Caller identity threaded through every RPC call.
#[derive(Debug, Clone)]
pub struct CallContext {
    address: IpAddr,
    session: Arc<dyn SessionContext>,
    connection: Option<Arc<Connection>>,
}

impl CallContext {
    /// Creates a context for a caller at `address`.
    #[must_use]
    pub fn new(address: IpAddr, session: Arc<dyn SessionContext>) -> Self {
        Self {
            address,
            session,
            connection: None,
        }
    }

    /// Returns a copy bound to the WebSocket connection the call arrived on.
    #[must_use]
    pub fn with_connection(&self, connection: Arc<Connection>) -> Self {
        Self {
            address: self.address,
            session: Arc::clone(&self.session),
            connection: Some(connection),
        }
    }

    /// Caller's resolved address.
    #[must_use]
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// Caller's session.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn SessionContext> {
        &self.session
    }

    /// Authenticated user, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.session.user_id()
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    /// The connection the call arrived on, for WebSocket calls.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }
}

/// Builds [`CallContext`]s for inbound HTTP requests and upgrades.
#[derive(Debug, Clone)]
pub struct ContextFactory {
    client_ip: ClientIpResolver,
    sessions: Arc<dyn SessionProvider>,
}

impl ContextFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(client_ip: ClientIpResolver, sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            client_ip,
            sessions,
        }
    }

    /// The session provider.
    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionProvider> {
        &self.sessions
    }

    /// Resolves a fresh context from request parts.
    #[must_use]
    pub fn build(&self, extensions: &Extensions, headers: &HeaderMap) -> CallContext {
        let address = self.client_ip.resolve(extensions, headers);
        CallContext::new(address, self.sessions.resolve(headers))
    }

    /// Returns the context installed by the context interceptor, or
    /// resolves one when the request bypassed it.
    #[must_use]
    pub fn for_request(&self, extensions: &Extensions, headers: &HeaderMap) -> CallContext {
        extensions
            .get::<CallContext>()
            .cloned()
            .unwrap_or_else(|| self.build(extensions, headers))
    }
}
