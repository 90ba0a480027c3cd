//! Live WebSocket connection record.
//!
//! A [`Connection`] is shared between its socket task (which owns the read
//! side and the `is_alive` writes), the writer task draining the outbound
//! queue, and the manager's heartbeat sweep and broadcasts. Outbound frames
//! go through a bounded mpsc queue so that no caller ever touches the
//! socket directly.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use super::messages::OutboundFrame;
use super::subscription::SubscriptionManager;
use crate::domain::CallContext;
use crate::error::GatewayError;
use crate::rpc::notification_text;

/// State of one upgraded WebSocket.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    path: String,
    context: CallContext,
    connected_at: DateTime<Utc>,
    subscriptions: RwLock<SubscriptionManager>,
    is_alive: AtomicBool,
    closed: AtomicBool,
    terminate: Notify,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl Connection {
    /// Creates a connection and the receiving end of its outbound queue.
    #[must_use]
    pub fn new(
        id: u64,
        path: impl Into<String>,
        context: CallContext,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id,
            path: path.into(),
            context,
            connected_at: Utc::now(),
            subscriptions: RwLock::new(SubscriptionManager::new()),
            is_alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            terminate: Notify::new(),
            outbound,
        };
        (connection, rx)
    }

    /// Process-unique connection id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Request path the connection was upgraded on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Caller context captured at upgrade time.
    #[must_use]
    pub const fn context(&self) -> &CallContext {
        &self.context
    }

    /// Caller's address.
    #[must_use]
    pub const fn address(&self) -> IpAddr {
        self.context.address()
    }

    /// Authenticated user bound to the session, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.context.user_id()
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.context.session_id()
    }

    /// Upgrade time.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Subscribes to `channel`. Returns `false` if already subscribed.
    pub fn subscribe(&self, channel: &str) -> bool {
        self.subscriptions.write().subscribe(channel)
    }

    /// Unsubscribes from `channel`. Returns `false` if not subscribed.
    pub fn unsubscribe(&self, channel: &str) -> bool {
        self.subscriptions.write().unsubscribe(channel)
    }

    /// Returns `true` if subscribed to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.read().matches(channel)
    }

    /// Subscribed channels, sorted.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().channels()
    }

    /// Records inbound traffic.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Release);
    }

    /// Reads and resets the liveness flag.
    ///
    /// Returns `true` if any traffic arrived since the previous call.
    pub fn take_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::AcqRel)
    }

    /// Queues a text frame, waiting for room in the queue.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionClosed`] once the writer is gone.
    pub async fn send(&self, text: String) -> Result<(), GatewayError> {
        self.outbound
            .send(OutboundFrame::Text(text))
            .await
            .map_err(|_| GatewayError::ConnectionClosed(self.id))
    }

    /// Queues a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::OutboundFull`] when the queue is full and
    /// [`GatewayError::ConnectionClosed`] once the writer is gone.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), GatewayError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => GatewayError::OutboundFull(self.id),
            mpsc::error::TrySendError::Closed(_) => GatewayError::ConnectionClosed(self.id),
        })
    }

    /// Sends a notification if subscribed to `channel`.
    ///
    /// Returns `Ok(false)` when not subscribed.
    ///
    /// # Errors
    ///
    /// See [`try_send`](Self::try_send).
    pub fn notify(&self, channel: &str, data: &Value) -> Result<bool, GatewayError> {
        if !self.is_subscribed(channel) {
            return Ok(false);
        }
        self.try_send(OutboundFrame::Text(notification_text(channel, data)))?;
        Ok(true)
    }

    /// Sends a pre-serialized frame if subscribed to `channel`.
    ///
    /// # Errors
    ///
    /// See [`try_send`](Self::try_send).
    pub fn notify_raw(&self, channel: &str, text: &str) -> Result<bool, GatewayError> {
        if !self.is_subscribed(channel) {
            return Ok(false);
        }
        self.try_send(OutboundFrame::Text(text.to_string()))?;
        Ok(true)
    }

    /// Starts the close handshake. Falls back to termination when the
    /// close frame cannot be queued.
    pub fn close(&self, code: u16, reason: &str) {
        let frame = OutboundFrame::Close {
            code,
            reason: reason.to_string(),
        };
        if let Err(err) = self.try_send(frame) {
            tracing::debug!(connection_id = self.id, error = %err, "close frame not queued, terminating");
            self.terminate();
        }
    }

    /// Drops the connection without a close handshake.
    pub fn terminate(&self) {
        self.terminate.notify_one();
    }

    /// Resolves once [`terminate`](Self::terminate) was called.
    pub async fn terminated(&self) {
        self.terminate.notified().await;
    }

    /// Clears the session bound to this connection.
    pub fn logout(&self) {
        self.context.session().clean();
    }

    /// Marks the connection closed. Returns `true` only for the first call.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` once the connection was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::Ipv4Addr;

    use axum::http::HeaderMap;
    use serde_json::json;

    use super::*;
    use crate::domain::{MemorySessionStore, SessionProvider};

    fn make_connection(capacity: usize) -> (Connection, mpsc::Receiver<OutboundFrame>) {
        let store = MemorySessionStore::new("sid");
        let ctx = CallContext::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            store.resolve(&HeaderMap::new()),
        );
        Connection::new(1, "/ws", ctx, capacity)
    }

    #[test]
    fn starts_alive_and_open() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.take_alive());
        assert!(!conn.take_alive());
        assert!(!conn.is_closed());
        assert_eq!(conn.path(), "/ws");
    }

    #[tokio::test]
    async fn notify_only_when_subscribed() {
        let (conn, mut rx) = make_connection(4);
        let Ok(sent) = conn.notify("prices", &json!(1)) else {
            panic!("notify failed");
        };
        assert!(!sent);

        conn.subscribe("prices");
        let Ok(sent) = conn.notify("prices", &json!({"btc": 2})) else {
            panic!("notify failed");
        };
        assert!(sent);

        let Some(OutboundFrame::Text(text)) = rx.recv().await else {
            panic!("expected text frame");
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            panic!("invalid json");
        };
        assert_eq!(value["method"], "prices");
        assert_eq!(value["params"]["btc"], 2);
    }

    #[test]
    fn full_queue_is_reported() {
        let (conn, _rx) = make_connection(1);
        conn.subscribe("c");
        assert!(conn.notify_raw("c", "one").is_ok());
        assert!(matches!(
            conn.notify_raw("c", "two"),
            Err(GatewayError::OutboundFull(1))
        ));
    }

    #[tokio::test]
    async fn send_after_writer_gone_fails() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(matches!(
            conn.send("x".to_string()).await,
            Err(GatewayError::ConnectionClosed(1))
        ));
    }

    #[test]
    fn mark_closed_fires_once() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn terminate_wakes_waiter() {
        let (conn, _rx) = make_connection(4);
        conn.terminate();
        let woke = tokio::time::timeout(std::time::Duration::from_secs(1), conn.terminated()).await;
        assert!(woke.is_ok());
    }

    #[tokio::test]
    async fn close_queues_close_frame() {
        let (conn, mut rx) = make_connection(4);
        conn.close(1000, "bye");
        let Some(frame) = rx.recv().await else {
            panic!("expected frame");
        };
        assert_eq!(
            frame,
            OutboundFrame::Close {
                code: 1000,
                reason: "bye".to_string()
            }
        );
    }

    #[test]
    fn logout_clears_session() {
        let (conn, _rx) = make_connection(4);
        conn.context().session().set_user_id(Some("eve".to_string()));
        assert_eq!(conn.user_id().as_deref(), Some("eve"));
        conn.logout();
        assert!(conn.user_id().is_none());
    }
}
