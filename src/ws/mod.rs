//! WebSocket layer: connection records, the connection manager, and the
//! JSON-RPC message handler.
//!
//! Upgrades on any path are routed by the [`ConnectionManager`] to the
//! first matching [`PathHandler`]. Each connection is served by its own
//! task, so frames from one client are processed strictly in order.

pub mod connection;
pub mod handler;
pub mod manager;
pub mod messages;
pub mod rpc_endpoint;
pub mod subscription;

pub use connection::Connection;
pub use manager::{
    Authorizer, BearerAuthorizer, ConnectionManager, MessageHandler, PathHandler, WILDCARD_PATH,
};
pub use messages::{CLOSE_NORMAL, CLOSE_POLICY, InboundFrame, OutboundFrame};
pub use rpc_endpoint::WsRpcEndpoint;
pub use subscription::SubscriptionManager;
