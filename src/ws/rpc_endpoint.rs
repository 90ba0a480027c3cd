//! JSON-RPC over WebSocket.
//!
//! [`WsRpcEndpoint`] is the [`MessageHandler`] behind every RPC path
//! handler: each inbound frame is one envelope, charged against the rate
//! limiter, processed, and answered on the same connection.

use std::sync::Arc;

use async_trait::async_trait;

use super::connection::Connection;
use super::manager::MessageHandler;
use super::messages::InboundFrame;
use crate::domain::RateLimiter;
use crate::error::GatewayError;
use crate::rpc::RpcProcessor;

/// Message handler running the RPC pipeline.
#[derive(Debug, Clone)]
pub struct WsRpcEndpoint {
    processor: Arc<RpcProcessor>,
    rate_limiter: Arc<RateLimiter>,
    limit_api: bool,
}

impl WsRpcEndpoint {
    /// Creates an endpoint. With `limit_api` every message is charged.
    #[must_use]
    pub const fn new(
        processor: Arc<RpcProcessor>,
        rate_limiter: Arc<RateLimiter>,
        limit_api: bool,
    ) -> Self {
        Self {
            processor,
            rate_limiter,
            limit_api,
        }
    }
}

#[async_trait]
impl MessageHandler for WsRpcEndpoint {
    async fn on_message(
        &self,
        frame: InboundFrame,
        connection: &Arc<Connection>,
    ) -> Result<(), GatewayError> {
        let ctx = connection.context().with_connection(Arc::clone(connection));
        if self.limit_api && !self.rate_limiter.can_perform_request(ctx.address()) {
            let response = self.processor.rate_limit_exceeded(&ctx);
            return connection.send(serde_json::to_string(&response)?).await;
        }
        let text = frame.into_text()?;
        let response = self.processor.process_str(&ctx, &text).await;
        connection.send(serde_json::to_string(&response)?).await
    }
}
