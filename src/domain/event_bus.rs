//! Fan-out of connection lifecycle events.
//!
//! The connection manager emits `connect`, `ping`, `message` and `close`
//! through an [`EventBus`]; presence tracking, metrics and tests observe
//! them by subscribing. Emitting never blocks the socket task: an observer
//! that falls more than `capacity` events behind loses the oldest ones and
//! sees a `Lagged` error on its next receive.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::{LifecycleEvent, LifecycleKind};
use crate::ws::Connection;

/// Lifecycle event bus shared by the connection manager and its observers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per observer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emits `kind` for `connection`, stamped now.
    ///
    /// Returns how many observers were handed the event; zero when nobody
    /// is listening.
    pub fn emit(&self, kind: LifecycleKind, connection: &Arc<Connection>) -> usize {
        self.publish(LifecycleEvent::new(kind, connection))
    }

    /// Emits a prepared event.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Registers an observer. It sees only events emitted afterwards.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
