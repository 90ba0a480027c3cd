//! Connection manager: path routing, lifecycle, heartbeat and broadcast.
//!
//! The manager owns an ordered list of [`PathHandler`]s, each with its own
//! connection set. An upgrade is routed to the first handler whose pattern
//! matches the request path (`*` matches everything). Every lifecycle
//! transition is published on the [`EventBus`].
//!
//! Liveness uses a two-tick scheme: a sweep resets `is_alive` and pings
//! connections that showed traffic since the previous sweep, and evicts
//! the ones that did not.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::Response;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::connection::Connection;
use super::messages::{CLOSE_NORMAL, CLOSE_POLICY, InboundFrame, OutboundFrame};
use crate::domain::{CallContext, EventBus, LifecycleKind};
use crate::error::GatewayError;
use crate::rpc::notification_text;

/// Pattern matching every path.
pub const WILDCARD_PATH: &str = "*";

/// Callback receiving data frames of a path handler's connections.
#[async_trait]
pub trait MessageHandler: Send + Sync + fmt::Debug {
    /// Handles one inbound frame. Errors are logged by the manager and do
    /// not close the connection.
    async fn on_message(
        &self,
        frame: InboundFrame,
        connection: &Arc<Connection>,
    ) -> Result<(), GatewayError>;
}

/// Upgrade-time authorization check.
#[async_trait]
pub trait Authorizer: Send + Sync + fmt::Debug {
    /// Returns `true` to accept the upgrade.
    async fn authorize(&self, headers: &HeaderMap, ctx: &CallContext) -> bool;
}

/// Accepts upgrades carrying `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct BearerAuthorizer {
    token: String,
}

impl BearerAuthorizer {
    /// Creates an authorizer expecting `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Authorizer for BearerAuthorizer {
    async fn authorize(&self, headers: &HeaderMap, _ctx: &CallContext) -> bool {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token.trim() == self.token)
    }
}

/// A WebSocket route with its own connection set.
#[derive(Debug)]
pub struct PathHandler {
    pattern: String,
    on_message: Arc<dyn MessageHandler>,
    authorizer: Option<Arc<dyn Authorizer>>,
    connections: DashMap<u64, Arc<Connection>>,
}

impl PathHandler {
    /// Creates a handler for `pattern` (exact path or `*`).
    #[must_use]
    pub fn new(pattern: impl Into<String>, on_message: Arc<dyn MessageHandler>) -> Self {
        Self {
            pattern: pattern.into(),
            on_message,
            authorizer: None,
            connections: DashMap::new(),
        }
    }

    /// Attaches an upgrade authorizer.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// The path pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns `true` if this handler owns upgrades on `path`.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.pattern == WILDCARD_PATH || self.pattern == path
    }

    /// Snapshot of the live connections.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Owner of all path handlers and their connections.
#[derive(Debug)]
pub struct ConnectionManager {
    handlers: RwLock<Vec<Arc<PathHandler>>>,
    next_id: AtomicU64,
    events: EventBus,
    outbound_capacity: usize,
}

impl ConnectionManager {
    /// Creates a manager publishing lifecycle events on `events`.
    #[must_use]
    pub fn new(events: EventBus, outbound_capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            events,
            outbound_capacity,
        }
    }

    /// The lifecycle event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Appends a handler. Earlier handlers take precedence.
    pub fn add_handler(&self, handler: PathHandler) -> Arc<PathHandler> {
        let handler = Arc::new(handler);
        self.handlers.write().push(Arc::clone(&handler));
        handler
    }

    /// Registered handlers in match order.
    #[must_use]
    pub fn handlers(&self) -> Vec<Arc<PathHandler>> {
        self.handlers.read().clone()
    }

    /// First handler matching `path`.
    #[must_use]
    pub fn match_handler(&self, path: &str) -> Option<Arc<PathHandler>> {
        self.handlers
            .read()
            .iter()
            .find(|handler| handler.matches(path))
            .map(Arc::clone)
    }

    /// Completes an upgrade for `handler`, running its authorizer first.
    pub async fn upgrade(
        self: &Arc<Self>,
        ws: WebSocketUpgrade,
        handler: Arc<PathHandler>,
        path: &str,
        headers: &HeaderMap,
        ctx: CallContext,
    ) -> Response {
        if let Some(authorizer) = &handler.authorizer
            && !authorizer.authorize(headers, &ctx).await
        {
            tracing::info!(address = %ctx.address(), path, "unauthorized websocket connection");
            return reject_upgrade(ws, "Unauthorized".to_string());
        }
        let manager = Arc::clone(self);
        let path = path.to_string();
        ws.on_upgrade(move |socket| async move {
            manager.run_connection(socket, handler, path, ctx).await;
        })
    }

    /// Registers a new connection on `handler` and emits `connect`.
    ///
    /// Returns the connection and the receiving end of its outbound queue.
    pub fn open_connection(
        &self,
        handler: &PathHandler,
        path: &str,
        ctx: CallContext,
    ) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (connection, rx) = Connection::new(id, path, ctx, self.outbound_capacity);
        let connection = Arc::new(connection);
        handler.connections.insert(id, Arc::clone(&connection));
        tracing::info!(connection_id = id, address = %connection.address(), path, "websocket connected");
        self.events.emit(LifecycleKind::Connect, &connection);
        (connection, rx)
    }

    /// Processes one data frame on the connection's own task.
    pub async fn handle_frame(
        &self,
        handler: &PathHandler,
        connection: &Arc<Connection>,
        frame: InboundFrame,
    ) {
        connection.mark_alive();
        self.events.emit(LifecycleKind::Message, connection);
        if let Err(err) = handler.on_message.on_message(frame, connection).await {
            tracing::error!(
                connection_id = connection.id(),
                address = %connection.address(),
                error = %err,
                "unexpected error while processing websocket message"
            );
        }
    }

    /// Records a heartbeat reply.
    pub fn handle_pong(&self, connection: &Arc<Connection>) {
        connection.mark_alive();
        self.events.emit(LifecycleKind::Ping, connection);
    }

    /// Removes the connection from `handler` and emits `close` once.
    pub fn close_connection(&self, handler: &PathHandler, connection: &Arc<Connection>) {
        handler.connections.remove(&connection.id());
        if connection.mark_closed() {
            tracing::debug!(connection_id = connection.id(), "websocket closed");
            self.events.emit(LifecycleKind::Close, connection);
        }
    }

    /// Runs one heartbeat sweep over every handler.
    ///
    /// Returns the number of evicted connections.
    pub fn sweep(&self) -> usize {
        let mut evicted = 0;
        for handler in self.handlers() {
            for connection in handler.connections() {
                if connection.take_alive() {
                    if let Err(err) = connection.try_send(OutboundFrame::Ping) {
                        tracing::debug!(connection_id = connection.id(), error = %err, "ping not queued");
                    }
                } else {
                    tracing::debug!(connection_id = connection.id(), "evicting silent websocket");
                    connection.terminate();
                    self.close_connection(&handler, &connection);
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Spawns the periodic heartbeat sweep. A zero `interval` is raised
    /// to one millisecond.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = manager.sweep();
                if evicted > 0 {
                    tracing::debug!(evicted, "heartbeat sweep");
                }
            }
        })
    }

    /// Sends a notification to every connection subscribed to `channel`.
    ///
    /// Returns the number of connections it was queued for.
    pub fn notify(&self, channel: &str, data: &Value) -> usize {
        self.notify_raw(channel, &notification_text(channel, data))
    }

    /// Sends a pre-serialized frame to every connection subscribed to
    /// `channel`. A failure on one connection does not stop delivery to
    /// the others.
    pub fn notify_raw(&self, channel: &str, text: &str) -> usize {
        let mut delivered = 0;
        for connection in self.connections() {
            match connection.notify_raw(channel, text) {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!(
                    connection_id = connection.id(),
                    channel,
                    error = %err,
                    "failed to deliver notification"
                ),
            }
        }
        delivered
    }

    /// Clears the session of and closes every connection bound to
    /// `session_id`. Returns how many were closed.
    pub fn logout_by_session_id(&self, session_id: &str) -> usize {
        let mut closed = 0;
        for connection in self.connections() {
            if connection.session_id() == session_id {
                connection.logout();
                connection.close(CLOSE_NORMAL, "Logout");
                closed += 1;
            }
        }
        closed
    }

    /// Returns `true` if `user_id` has at least one open connection.
    #[must_use]
    pub fn has_open_sessions(&self, user_id: &str) -> bool {
        self.handlers().iter().any(|handler| {
            handler
                .connections
                .iter()
                .any(|entry| entry.value().user_id().as_deref() == Some(user_id))
        })
    }

    /// Snapshot of every live connection across handlers.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.handlers()
            .iter()
            .flat_map(|handler| handler.connections())
            .collect()
    }

    /// Number of live connections across handlers.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.handlers
            .read()
            .iter()
            .map(|handler| handler.connection_count())
            .sum()
    }

    async fn run_connection(
        self: Arc<Self>,
        socket: WebSocket,
        handler: Arc<PathHandler>,
        path: String,
        ctx: CallContext,
    ) {
        let (connection, mut outbound_rx) = self.open_connection(&handler, &path, ctx);
        let (mut ws_tx, mut ws_rx) = socket.split();
        let connection_id = connection.id();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let closing = frame.is_close();
                if let Err(err) = ws_tx.send(frame.into_message()).await {
                    tracing::debug!(connection_id, error = %err, "websocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        loop {
            let frame = tokio::select! {
                () = connection.terminated() => break,
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => InboundFrame::Text(text.as_str().to_string()),
                    Some(Ok(Message::Binary(bytes))) => InboundFrame::Binary(bytes.to_vec()),
                    Some(Ok(Message::Pong(_))) => {
                        self.handle_pong(&connection);
                        continue;
                    }
                    Some(Ok(Message::Ping(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(connection_id, error = %err, "websocket read failed");
                        break;
                    }
                },
            };
            // A reply can wait on a full outbound queue when the peer stops
            // reading; eviction must still end the task.
            tokio::select! {
                () = connection.terminated() => break,
                () = self.handle_frame(&handler, &connection, frame) => {}
            }
        }

        writer.abort();
        self.close_connection(&handler, &connection);
    }
}

/// Completes the handshake only to send a policy close with `reason`.
pub fn reject_upgrade(ws: WebSocketUpgrade, reason: String) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let frame = OutboundFrame::Close {
            code: CLOSE_POLICY,
            reason,
        };
        if let Err(err) = socket.send(frame.into_message()).await {
            tracing::debug!(error = %err, "failed to send policy close");
        }
    })
}
