//! JSON-RPC core: envelope, method registry, API modules, and processing.

pub mod api_module;
pub mod envelope;
pub mod processor;
pub mod registry;

pub use api_module::{ApiModule, ApiModuleBuilder, require_user};
pub use envelope::{
    RpcId, RpcOutcome, RpcRequest, RpcResponse, build_notification, notification_text,
};
pub use processor::{RpcProcessor, UNKNOWN_METHOD};
pub use registry::{MethodEntry, MethodRegistry, RpcApi, RpcHandler};
