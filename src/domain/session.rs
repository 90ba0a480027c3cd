//! Caller session abstraction.
//!
//! Session persistence is owned by the surrounding system; the gateway
//! only needs the narrow [`SessionContext`] view of it, resolved once per
//! request or connection by a [`SessionProvider`]. [`MemorySessionStore`]
//! is a process-local provider keyed by a session cookie.

use std::fmt;
use std::sync::Arc;

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use dashmap::DashMap;

/// Session state visible to RPC methods and the connection manager.
pub trait SessionContext: Send + Sync + fmt::Debug {
    /// Opaque session identifier.
    fn session_id(&self) -> &str;

    /// Authenticated user, if any.
    fn user_id(&self) -> Option<String>;

    /// Binds (or with `None`, unbinds) the authenticated user.
    fn set_user_id(&self, user_id: Option<String>);

    /// Drops all session state.
    fn clean(&self);
}

/// Resolves the session for an inbound request.
pub trait SessionProvider: Send + Sync + fmt::Debug {
    /// Returns the caller's session, creating a fresh one if needed.
    fn resolve(&self, headers: &HeaderMap) -> Arc<dyn SessionContext>;

    /// `Set-Cookie` value to attach to the response, if any.
    fn cookie_header(&self, _session: &dyn SessionContext) -> Option<HeaderValue> {
        None
    }
}

/// In-memory session provider.
///
/// Only authenticated sessions are stored: an anonymous session costs
/// nothing until a user id is bound to it.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    cookie_name: String,
    users: Arc<DashMap<String, String>>,
}

impl MemorySessionStore {
    /// Creates an empty store reading the given cookie.
    #[must_use]
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            users: Arc::new(DashMap::new()),
        }
    }

    /// Returns the number of authenticated sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if no session is authenticated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn cookie_value<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value)
    }
}

impl SessionProvider for MemorySessionStore {
    fn resolve(&self, headers: &HeaderMap) -> Arc<dyn SessionContext> {
        let id = self
            .cookie_value(headers)
            .filter(|id| self.users.contains_key(*id))
            .map_or_else(|| uuid::Uuid::new_v4().simple().to_string(), str::to_string);
        Arc::new(MemorySession {
            id,
            users: Arc::clone(&self.users),
        })
    }

    fn cookie_header(&self, session: &dyn SessionContext) -> Option<HeaderValue> {
        session.user_id()?;
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.cookie_name,
            session.session_id()
        ))
        .ok()
    }
}

/// Session handle issued by [`MemorySessionStore`].
#[derive(Debug)]
pub struct MemorySession {
    id: String,
    users: Arc<DashMap<String, String>>,
}

impl SessionContext for MemorySession {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> Option<String> {
        self.users.get(&self.id).map(|user| user.value().clone())
    }

    fn set_user_id(&self, user_id: Option<String>) {
        match user_id {
            Some(user) => {
                self.users.insert(self.id.clone(), user);
            }
            None => {
                self.users.remove(&self.id);
            }
        }
    }

    fn clean(&self) {
        self.users.remove(&self.id);
    }
}
