//! HTTP endpoint handlers.

pub mod rpc;
pub mod system;

pub use rpc::{BodyKind, HttpRpcEndpoint, JSON_RPC_FIELD};
