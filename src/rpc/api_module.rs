//! Builder for static method tables.
//!
//! An [`ApiModule`] is the usual way to implement [`RpcApi`]: methods are
//! registered by name with a closure, either raw (`Value` in, `Value` out)
//! or typed (params deserialized with serde, result serialized back). An
//! optional guard runs before parameter validation on every call.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::registry::RpcApi;
use crate::domain::CallContext;
use crate::error::{ApiError, GatewayError, RpcError};

type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, ApiError>> + Send>>;
type MethodFn = Arc<dyn Fn(CallContext, Value) -> MethodFuture + Send + Sync>;
type GuardFn = Arc<dyn Fn(&CallContext, &str) -> Result<(), RpcError> + Send + Sync>;

/// An API built from a static method table.
pub struct ApiModule {
    name: String,
    methods: BTreeMap<String, MethodFn>,
    guard: Option<GuardFn>,
}

impl fmt::Debug for ApiModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiModule")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

impl ApiModule {
    /// Starts a builder for an API named `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ApiModuleBuilder {
        ApiModuleBuilder {
            module: Self {
                name: name.into(),
                methods: BTreeMap::new(),
                guard: None,
            },
            duplicates: Vec::new(),
        }
    }
}

#[async_trait]
impl RpcApi for ApiModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn exported_methods(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Value,
    ) -> Result<Value, ApiError> {
        let Some(handler) = self.methods.get(method) else {
            return Err(RpcError::method_not_found().into());
        };
        if let Some(guard) = &self.guard {
            guard(ctx, method)?;
        }
        handler(ctx.clone(), params).await
    }
}

/// Builder returned by [`ApiModule::builder`].
pub struct ApiModuleBuilder {
    module: ApiModule,
    duplicates: Vec<String>,
}

impl fmt::Debug for ApiModuleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiModuleBuilder")
            .field("module", &self.module)
            .field("duplicates", &self.duplicates)
            .finish()
    }
}

impl ApiModuleBuilder {
    /// Adds a method taking and returning raw JSON.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let handler: MethodFn =
            Arc::new(move |ctx: CallContext, params: Value| -> MethodFuture {
                Box::pin(handler(ctx, params))
            });
        self.insert(name, handler);
        self
    }

    /// Adds a method with typed params and result.
    ///
    /// Params that fail to deserialize are answered with `INVALID_PARAMS`
    /// carrying the deserializer's message.
    #[must_use]
    pub fn typed<P, R, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped: MethodFn = Arc::new(move |ctx: CallContext, params: Value| -> MethodFuture {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let params: P = serde_json::from_value(params)
                    .map_err(|err| RpcError::invalid_params(err.to_string()))?;
                let result = handler(ctx, params).await?;
                serde_json::to_value(result).map_err(ApiError::internal)
            })
        });
        self.insert(name, wrapped);
        self
    }

    /// Installs an access check run before every method.
    #[must_use]
    pub fn guard<G>(mut self, guard: G) -> Self
    where
        G: Fn(&CallContext, &str) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        self.module.guard = Some(Arc::new(guard));
        self
    }

    /// Finishes the module.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateMethod`] if a method name was added
    /// twice.
    pub fn build(self) -> Result<Arc<ApiModule>, GatewayError> {
        if let Some(name) = self.duplicates.into_iter().next() {
            return Err(GatewayError::DuplicateMethod(format!(
                "{}/{name}",
                self.module.name
            )));
        }
        Ok(Arc::new(self.module))
    }

    fn insert(&mut self, name: &str, handler: MethodFn) {
        if self.module.methods.insert(name.to_string(), handler).is_some() {
            self.duplicates.push(name.to_string());
        }
    }
}

/// Guard that rejects callers without an authenticated session.
///
/// # Errors
///
/// Returns an `UNAUTHORIZED` [`RpcError`] for guests.
pub fn require_user(ctx: &CallContext, _method: &str) -> Result<(), RpcError> {
    if ctx.user_id().is_some() {
        Ok(())
    } else {
        Err(RpcError::new(RpcError::UNAUTHORIZED, "UNAUTHORIZED"))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use axum::http::HeaderMap;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::domain::{MemorySessionStore, SessionProvider};

    #[derive(Deserialize)]
    struct AddParams {
        a: i64,
        b: i64,
    }

    fn ctx() -> CallContext {
        let store = MemorySessionStore::new("sid");
        CallContext::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            store.resolve(&HeaderMap::new()),
        )
    }

    fn math() -> Arc<ApiModule> {
        let built = ApiModule::builder("math")
            .typed("add", |_ctx, p: AddParams| async move {
                Ok::<_, ApiError>(p.a + p.b)
            })
            .method("fail", |_ctx, _params| async move {
                Err::<Value, _>(ApiError::from(anyhow::anyhow!("disk on fire")))
            })
            .build();
        let Ok(module) = built else {
            panic!("build failed");
        };
        module
    }

    #[tokio::test]
    async fn typed_method_roundtrips_params() {
        let result = math().execute(&ctx(), "add", json!({"a": 2, "b": 3})).await;
        let Ok(value) = result else {
            panic!("add failed");
        };
        assert_eq!(value, json!(5));
    }

    #[tokio::test]
    async fn bad_params_are_invalid_params() {
        let result = math().execute(&ctx(), "add", json!({"a": "two"})).await;
        let Err(ApiError::Rpc(err)) = result else {
            panic!("expected INVALID_PARAMS");
        };
        assert_eq!(err.code, RpcError::INVALID_PARAMS);
        assert!(err.data.is_some());
    }

    #[tokio::test]
    async fn unexported_method_is_not_found() {
        let result = math().execute(&ctx(), "sub", Value::Null).await;
        let Err(ApiError::Rpc(err)) = result else {
            panic!("expected METHOD_NOT_FOUND");
        };
        assert_eq!(err.code, RpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn internal_failures_stay_internal() {
        let result = math().execute(&ctx(), "fail", Value::Null).await;
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }

    #[tokio::test]
    async fn guard_runs_before_validation() {
        let built = ApiModule::builder("admin")
            .typed("add", |_ctx, p: AddParams| async move {
                Ok::<_, ApiError>(p.a + p.b)
            })
            .guard(require_user)
            .build();
        let Ok(module) = built else {
            panic!("build failed");
        };
        let result = module.execute(&ctx(), "add", json!("garbage")).await;
        let Err(ApiError::Rpc(err)) = result else {
            panic!("expected UNAUTHORIZED");
        };
        assert_eq!(err.code, RpcError::UNAUTHORIZED);
    }

    #[test]
    fn duplicate_method_fails_build() {
        let built = ApiModule::builder("dup")
            .method("x", |_ctx, params| async move { Ok::<_, ApiError>(params) })
            .method("x", |_ctx, params| async move { Ok::<_, ApiError>(params) })
            .build();
        assert!(matches!(built, Err(GatewayError::DuplicateMethod(name)) if name == "dup/x"));
    }

    #[test]
    fn exported_methods_are_sorted() {
        assert_eq!(math().exported_methods(), vec!["add", "fail"]);
    }
}
