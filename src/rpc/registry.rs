//! Method registry and dispatch.
//!
//! A [`MethodRegistry`] is built once per binding from the APIs it exposes.
//! Each API publishes a static list of exported method names; the registry
//! maps every qualified name (`api/method` with prefixes, bare `method`
//! without) to its owner. After construction the registry is frozen behind
//! an [`Arc`] and only read.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::CallContext;
use crate::error::{ApiError, GatewayError, RpcError};

/// An application API exposing RPC methods.
#[async_trait]
pub trait RpcApi: Send + Sync + fmt::Debug {
    /// Owner key, also used as the namespace prefix.
    fn name(&self) -> &str;

    /// Methods callable over RPC.
    fn exported_methods(&self) -> Vec<String>;

    /// Runs `method`. Must reject anything not in
    /// [`exported_methods`](Self::exported_methods) with `METHOD_NOT_FOUND`.
    async fn execute(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Value,
    ) -> Result<Value, ApiError>;
}

/// One resolvable method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEntry {
    /// Name callers use.
    pub qualified_name: String,
    /// Key of the owning API.
    pub owner_key: String,
    /// Name passed to the owner's `execute`.
    pub method_name: String,
}

/// Qualified name to owner mapping.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    entries: HashMap<String, MethodEntry>,
    apis: HashMap<String, Arc<dyn RpcApi>>,
}

impl MethodRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a set of APIs.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateApi`] or
    /// [`GatewayError::DuplicateMethod`] when two registrations collide.
    pub fn from_apis<I>(apis: I, prefix: bool) -> Result<Self, GatewayError>
    where
        I: IntoIterator<Item = Arc<dyn RpcApi>>,
    {
        let mut registry = Self::new();
        for api in apis {
            registry.add_api(api, prefix)?;
        }
        Ok(registry)
    }

    /// Registers an API and all of its exported methods.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateApi`] if an API with the same name
    /// is already registered, or [`GatewayError::DuplicateMethod`] if one
    /// of its qualified names is taken.
    pub fn add_api(&mut self, api: Arc<dyn RpcApi>, prefix: bool) -> Result<(), GatewayError> {
        let key = api.name().to_string();
        if self.apis.contains_key(&key) {
            return Err(GatewayError::DuplicateApi(key));
        }
        let prefix = prefix.then_some(key.as_str());
        self.register(api.exported_methods(), &key, prefix)?;
        self.apis.insert(key, api);
        Ok(())
    }

    /// Adds entries for `method_names` owned by `owner_key`.
    ///
    /// Nothing is inserted when any of the names collides.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateMethod`] on the first collision.
    pub fn register<I, S>(
        &mut self,
        method_names: I,
        owner_key: &str,
        prefix: Option<&str>,
    ) -> Result<(), GatewayError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut staged: Vec<MethodEntry> = Vec::new();
        for method in method_names {
            let method_name = method.into();
            let qualified_name = match prefix {
                Some(prefix) => format!("{prefix}/{method_name}"),
                None => method_name.clone(),
            };
            if self.entries.contains_key(&qualified_name)
                || staged.iter().any(|e| e.qualified_name == qualified_name)
            {
                return Err(GatewayError::DuplicateMethod(qualified_name));
            }
            staged.push(MethodEntry {
                qualified_name,
                owner_key: owner_key.to_string(),
                method_name,
            });
        }
        for entry in staged {
            self.entries.insert(entry.qualified_name.clone(), entry);
        }
        Ok(())
    }

    /// Looks up a qualified name.
    ///
    /// # Errors
    ///
    /// Returns `METHOD_NOT_FOUND` for unknown names.
    pub fn resolve(&self, name: &str) -> Result<&MethodEntry, RpcError> {
        self.entries.get(name).ok_or_else(RpcError::method_not_found)
    }

    /// Registered qualified names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no method is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the registry into a dispatcher.
    #[must_use]
    pub fn create_handler(self) -> RpcHandler {
        RpcHandler {
            registry: Arc::new(self),
        }
    }
}

/// Callable `(method, params) -> result` over a frozen registry.
#[derive(Debug, Clone)]
pub struct RpcHandler {
    registry: Arc<MethodRegistry>,
}

impl RpcHandler {
    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Resolves `method` and runs it on its owner.
    ///
    /// # Errors
    ///
    /// Returns `METHOD_NOT_FOUND` when resolution fails, or whatever the
    /// owning API returns.
    pub async fn call(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Value,
    ) -> Result<Value, ApiError> {
        let entry = self.registry.resolve(method)?;
        let api = self
            .registry
            .apis
            .get(&entry.owner_key)
            .ok_or_else(RpcError::method_not_found)?;
        api.execute(ctx, &entry.method_name, params).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use axum::http::HeaderMap;
    use serde_json::json;

    use super::*;
    use crate::domain::{MemorySessionStore, SessionProvider};

    #[derive(Debug)]
    struct StaticApi {
        name: &'static str,
        methods: &'static [&'static str],
    }

    #[async_trait]
    impl RpcApi for StaticApi {
        fn name(&self) -> &str {
            self.name
        }

        fn exported_methods(&self) -> Vec<String> {
            self.methods.iter().map(|m| (*m).to_string()).collect()
        }

        async fn execute(
            &self,
            _ctx: &CallContext,
            method: &str,
            params: Value,
        ) -> Result<Value, ApiError> {
            if !self.methods.contains(&method) {
                return Err(RpcError::method_not_found().into());
            }
            Ok(json!({"api": self.name, "method": method, "params": params}))
        }
    }

    fn api(name: &'static str, methods: &'static [&'static str]) -> Arc<dyn RpcApi> {
        Arc::new(StaticApi { name, methods })
    }

    fn ctx() -> CallContext {
        let store = MemorySessionStore::new("sid");
        CallContext::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            store.resolve(&HeaderMap::new()),
        )
    }

    #[test]
    fn resolve_returns_registered_owner() {
        let Ok(registry) = MethodRegistry::from_apis(
            [api("user", &["get", "list"]), api("shop", &["buy"])],
            true,
        ) else {
            panic!("registration failed");
        };
        let Ok(entry) = registry.resolve("user/list") else {
            panic!("user/list not found");
        };
        assert_eq!(entry.owner_key, "user");
        assert_eq!(entry.method_name, "list");
        assert_eq!(registry.methods(), vec!["shop/buy", "user/get", "user/list"]);
    }

    #[test]
    fn unprefixed_names_are_bare() {
        let Ok(registry) = MethodRegistry::from_apis([api("user", &["get"])], false) else {
            panic!("registration failed");
        };
        assert!(registry.resolve("get").is_ok());
        let Err(err) = registry.resolve("user/get") else {
            panic!("prefixed name should not resolve");
        };
        assert_eq!(err.code, RpcError::METHOD_NOT_FOUND);
    }

    #[test]
    fn duplicates_are_rejected() {
        let result = MethodRegistry::from_apis([api("a", &["x"]), api("b", &["x"])], false);
        assert!(matches!(result, Err(GatewayError::DuplicateMethod(name)) if name == "x"));

        let result = MethodRegistry::from_apis([api("a", &["x"]), api("a", &["y"])], true);
        assert!(matches!(result, Err(GatewayError::DuplicateApi(name)) if name == "a"));
    }

    #[test]
    fn failed_register_inserts_nothing() {
        let mut registry = MethodRegistry::new();
        let result = registry.register(["one", "two", "one"], "owner", None);
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn handler_dispatches_to_owner() {
        let Ok(registry) = MethodRegistry::from_apis([api("user", &["get"])], true) else {
            panic!("registration failed");
        };
        let handler = registry.create_handler();
        let result = handler.call(&ctx(), "user/get", json!({"id": 3})).await;
        let Ok(value) = result else {
            panic!("call failed");
        };
        assert_eq!(value["method"], "get");
        assert_eq!(value["params"]["id"], 3);
    }

    #[tokio::test]
    async fn owner_mismatch_is_method_not_found() {
        let mut registry = MethodRegistry::new();
        let Ok(()) = registry.add_api(api("user", &["get"]), true) else {
            panic!("registration failed");
        };
        // An entry whose owner does not export the method.
        let Ok(()) = registry.register(["delete"], "user", Some("user")) else {
            panic!("registration failed");
        };
        let handler = registry.create_handler();
        let Err(ApiError::Rpc(err)) = handler.call(&ctx(), "user/delete", Value::Null).await
        else {
            panic!("expected rpc error");
        };
        assert_eq!(err.code, RpcError::METHOD_NOT_FOUND);
    }
}
