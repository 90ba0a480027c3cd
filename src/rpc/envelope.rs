//! JSON-RPC 2.0 envelope shapes.
//!
//! Requests are parsed from a [`serde_json::Value`] by hand so that any
//! structural defect (not an object, bad `id`, missing `method`) maps to a
//! single `PARSE_ERROR` instead of a serde message. Responses always carry
//! `"jsonrpc": "2.0"`, the request id (possibly `null`) and exactly one of
//! `result` or `error`.

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value, json};

use crate::error::RpcError;

/// Protocol version tag written into every outbound envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier: a number, a string, or `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    /// Numeric id.
    Number(Number),
    /// String id.
    String(String),
    /// Absent or explicit `null`.
    #[default]
    Null,
}

impl From<i64> for RpcId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for RpcId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// A parsed JSON-RPC request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// Caller-chosen id echoed in the response.
    pub id: RpcId,
    /// Qualified method name.
    pub method: String,
    /// Method parameters, `null` when omitted.
    pub params: Value,
}

impl RpcRequest {
    /// Extracts a request from a parsed JSON document.
    ///
    /// # Errors
    ///
    /// Returns a `PARSE_ERROR` [`RpcError`] when the document is not an
    /// object, `id` is neither number, string nor null, or `method` is
    /// missing or not a string.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let Value::Object(mut object) = value else {
            return Err(RpcError::parse_error(Some("Request must be an object")));
        };
        let id = match object.remove("id") {
            None | Some(Value::Null) => RpcId::Null,
            Some(Value::Number(n)) => RpcId::Number(n),
            Some(Value::String(s)) => RpcId::String(s),
            Some(_) => return Err(RpcError::parse_error(Some("Invalid id"))),
        };
        let Some(Value::String(method)) = object.remove("method") else {
            return Err(RpcError::parse_error(Some("Invalid method")));
        };
        let params = object.remove("params").unwrap_or(Value::Null);
        Ok(Self { id, method, params })
    }
}

/// Either side of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    /// Successful call.
    Result(Value),
    /// Failed call.
    Error(RpcError),
}

/// A JSON-RPC response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    /// Id copied from the request, `null` when it could not be read.
    pub id: RpcId,
    /// Result or error.
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    /// Success response.
    #[must_use]
    pub const fn success(id: RpcId, result: Value) -> Self {
        Self {
            id,
            outcome: RpcOutcome::Result(result),
        }
    }

    /// Error response.
    #[must_use]
    pub const fn error(id: RpcId, error: RpcError) -> Self {
        Self {
            id,
            outcome: RpcOutcome::Error(error),
        }
    }

    /// Returns `true` for a success response.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, RpcOutcome::Result(_))
    }

    /// The error object, if this is an error response.
    #[must_use]
    pub const fn rpc_error(&self) -> Option<&RpcError> {
        match &self.outcome {
            RpcOutcome::Error(err) => Some(err),
            RpcOutcome::Result(_) => None,
        }
    }

    /// The result value, if this is a success response.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        match &self.outcome {
            RpcOutcome::Result(value) => Some(value),
            RpcOutcome::Error(_) => None,
        }
    }
}

impl Serialize for RpcResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        map.serialize_entry("id", &self.id)?;
        match &self.outcome {
            RpcOutcome::Result(value) => map.serialize_entry("result", value)?,
            RpcOutcome::Error(err) => map.serialize_entry("error", err)?,
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    id: RpcId,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

// Distinguishes `"result": null` from a missing `result`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl<'de> Deserialize<'de> for RpcResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawResponse::deserialize(deserializer)?;
        let outcome = match (raw.result, raw.error) {
            (_, Some(err)) => RpcOutcome::Error(err),
            (Some(value), None) => RpcOutcome::Result(value),
            (None, None) => {
                return Err(serde::de::Error::custom(
                    "response has neither result nor error",
                ));
            }
        };
        Ok(Self {
            id: raw.id,
            outcome,
        })
    }
}

/// Builds a server-push notification for `channel`.
#[must_use]
pub fn build_notification(channel: &str, data: &Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": channel,
        "params": data,
    })
}

/// Serialized form of [`build_notification`].
#[must_use]
pub fn notification_text(channel: &str, data: &Value) -> String {
    build_notification(channel, data).to_string()
}
