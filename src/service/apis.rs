//! Built-in RPC APIs served by the gateway binary.
//!
//! - `system`: liveness and clock probes.
//! - `session`: binds a user name to the caller's session.
//! - `channel`: WebSocket subscriptions and fan-out publishing.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::CallContext;
use crate::error::{ApiError, GatewayError, RpcError};
use crate::rpc::{ApiModule, RpcApi, require_user};
use crate::ws::{Connection, ConnectionManager};

/// Params of `session/login`.
#[derive(Debug, Deserialize)]
pub struct LoginParams {
    /// User name to bind to the session.
    pub user: String,
}

/// Params of `channel/subscribe` and `channel/unsubscribe`.
#[derive(Debug, Deserialize)]
pub struct ChannelParams {
    /// Channel name.
    pub channel: String,
}

/// Params of `channel/publish`.
#[derive(Debug, Deserialize)]
pub struct PublishParams {
    /// Channel name.
    pub channel: String,
    /// Notification payload.
    #[serde(default)]
    pub data: Value,
}

/// Identity reported by `session/whoami` and `session/login`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Authenticated user, if any.
    pub user_id: Option<String>,
    /// Session identifier.
    pub session_id: String,
}

impl Identity {
    fn of(ctx: &CallContext) -> Self {
        Self {
            user_id: ctx.user_id(),
            session_id: ctx.session_id().to_string(),
        }
    }
}

/// `system/ping`, `system/echo` and `system/time`.
///
/// # Errors
///
/// Returns [`GatewayError::DuplicateMethod`] if the method table is
/// malformed.
pub fn system_api() -> Result<Arc<ApiModule>, GatewayError> {
    ApiModule::builder("system")
        .method("ping", |_ctx: CallContext, _params: Value| async move {
            Ok::<_, ApiError>(json!("pong"))
        })
        .method("echo", |_ctx: CallContext, params: Value| async move {
            Ok::<_, ApiError>(params)
        })
        .method("time", |_ctx: CallContext, _params: Value| async move {
            Ok::<_, ApiError>(json!({ "now": Utc::now().to_rfc3339() }))
        })
        .build()
}

/// `session/login`, `session/logout` and `session/whoami`.
///
/// Logging out also closes every WebSocket bound to the session, the
/// calling one included.
///
/// # Errors
///
/// Returns [`GatewayError::DuplicateMethod`] if the method table is
/// malformed.
pub fn session_api(connections: Arc<ConnectionManager>) -> Result<Arc<ApiModule>, GatewayError> {
    ApiModule::builder("session")
        .typed("login", |ctx: CallContext, params: LoginParams| async move {
            let user = params.user.trim();
            if user.is_empty() {
                return Err(ApiError::from(RpcError::invalid_params("user is empty")));
            }
            ctx.session().set_user_id(Some(user.to_string()));
            tracing::info!(address = %ctx.address(), user, "session login");
            Ok(Identity::of(&ctx))
        })
        .method("logout", move |ctx: CallContext, _params: Value| {
            let connections = Arc::clone(&connections);
            async move {
                ctx.session().clean();
                let closed = connections.logout_by_session_id(ctx.session_id());
                Ok::<_, ApiError>(json!({ "closed": closed }))
            }
        })
        .method("whoami", |ctx: CallContext, _params: Value| async move {
            serde_json::to_value(Identity::of(&ctx)).map_err(ApiError::internal)
        })
        .build()
}

/// `channel/subscribe`, `channel/unsubscribe`, `channel/list` and
/// `channel/publish`.
///
/// Subscription methods only make sense over WebSocket. Publishing
/// requires a logged-in session.
///
/// # Errors
///
/// Returns [`GatewayError::DuplicateMethod`] if the method table is
/// malformed.
pub fn channel_api(connections: Arc<ConnectionManager>) -> Result<Arc<ApiModule>, GatewayError> {
    ApiModule::builder("channel")
        .typed(
            "subscribe",
            |ctx: CallContext, params: ChannelParams| async move {
                let connection = websocket_only(&ctx)?;
                Ok::<_, ApiError>(json!({ "subscribed": connection.subscribe(&params.channel) }))
            },
        )
        .typed(
            "unsubscribe",
            |ctx: CallContext, params: ChannelParams| async move {
                let connection = websocket_only(&ctx)?;
                Ok::<_, ApiError>(
                    json!({ "unsubscribed": connection.unsubscribe(&params.channel) }),
                )
            },
        )
        .method("list", |ctx: CallContext, _params: Value| async move {
            let connection = websocket_only(&ctx)?;
            Ok::<_, ApiError>(json!(connection.subscriptions()))
        })
        .typed("publish", move |ctx: CallContext, params: PublishParams| {
            let connections = Arc::clone(&connections);
            async move {
                require_user(&ctx, "publish")?;
                let delivered = connections.notify(&params.channel, &params.data);
                Ok::<_, ApiError>(json!({ "delivered": delivered }))
            }
        })
        .build()
}

/// Every built-in API, ready for binding.
///
/// # Errors
///
/// Returns [`GatewayError::DuplicateMethod`] if a method table is
/// malformed.
pub fn builtin_apis(
    connections: &Arc<ConnectionManager>,
) -> Result<Vec<Arc<dyn RpcApi>>, GatewayError> {
    Ok(vec![
        system_api()? as Arc<dyn RpcApi>,
        session_api(Arc::clone(connections))?,
        channel_api(Arc::clone(connections))?,
    ])
}

fn websocket_only(ctx: &CallContext) -> Result<Arc<Connection>, RpcError> {
    ctx.connection().map(Arc::clone).ok_or_else(|| {
        RpcError::new(RpcError::INVALID_REQUEST, "INVALID_REQUEST")
            .with_data("only available over WebSocket")
    })
}
