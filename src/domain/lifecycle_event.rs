//! Connection lifecycle events.
//!
//! The connection manager publishes a [`LifecycleEvent`] on the
//! [`super::EventBus`] at every lifecycle transition. Observers such as
//! presence tracking subscribe to the bus instead of registering callbacks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ws::Connection;

/// Lifecycle transition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    /// Handshake completed and the connection was registered.
    Connect,
    /// A heartbeat pong arrived.
    Ping,
    /// A data frame arrived.
    Message,
    /// The connection closed. Emitted exactly once per connection.
    Close,
}

/// A lifecycle transition of one connection.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// What happened.
    pub kind: LifecycleKind,
    /// The connection it happened to.
    pub connection: Arc<Connection>,
    /// When it was observed.
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: LifecycleKind, connection: &Arc<Connection>) -> Self {
        Self {
            kind,
            connection: Arc::clone(connection),
            timestamp: Utc::now(),
        }
    }

    /// Identifier of the connection.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection.id()
    }
}
