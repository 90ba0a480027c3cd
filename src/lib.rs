//! # rpc-gateway
//!
//! JSON-RPC 2.0 over HTTP and WebSocket, with per-address credit rate
//! limiting, CORS gating, and multipart file uploads.
//!
//! Application code implements [`rpc::RpcApi`] (usually through
//! [`rpc::ApiModule`]) and binds sets of APIs to transports with
//! [`gateway::Gateway`]. The gateway owns envelope parsing, method
//! dispatch, admission control, and connection bookkeeping.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── Interceptors: CORS, call context (api/)
//!     ├── HttpRpcEndpoint (api/)      WsRpcEndpoint + ConnectionManager (ws/)
//!     │
//!     ├── RateLimiter (domain/)
//!     ├── RpcProcessor → RpcHandler → MethodRegistry (rpc/)
//!     │
//!     └── RpcApi implementations (service/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod rpc;
pub mod service;
pub mod ws;
