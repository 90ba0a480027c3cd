//! Service layer: the RPC APIs the gateway binary ships with.
//!
//! Each API is an [`crate::rpc::ApiModule`]; [`builtin_apis`] collects them
//! for binding over HTTP and WebSocket.

pub mod apis;

pub use apis::{builtin_apis, channel_api, session_api, system_api};
