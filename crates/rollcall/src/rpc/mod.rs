//! Line-delimited JSON RPC over TCP.
//!
//! Each call is one request line and one reply line on a plain TCP stream:
//!
//! ```text
//! → {"method":"Ping","params":{"id":2}}
//! ← {"result":{"id":2,"instance_id":"9f3c..."}}
//! ← {"error":{"kind":"not_found","message":"..."}}
//! ```
//!
//! Methods are dispatched by name to an [`RpcHandler`]. A connection may
//! carry several calls in sequence.

use async_trait::async_trait;
use rollcall_common::{RollcallError, RollcallResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod client;
mod server;

pub use client::RpcClient;
pub use server::RpcServer;

/// A request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A reply frame; exactly one of `result`/`error` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl RpcResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: &RollcallError) -> Self {
        Self {
            result: None,
            error: Some(WireError::from(error)),
        }
    }
}

/// Error as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
    /// Cluster name, for exhaustion errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Raised roster bound, for exhaustion errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_bound: Option<u32>,
    /// Rejected status change, for transition errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<WireTransition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransition {
    pub node: String,
    pub from: String,
    pub to: String,
}

impl From<&RollcallError> for WireError {
    fn from(err: &RollcallError) -> Self {
        let (cluster, new_bound) = match err {
            RollcallError::Exhaustion { name, new_bound } => (Some(name.clone()), Some(*new_bound)),
            _ => (None, None),
        };
        let transition = match err {
            RollcallError::InvalidTransition { node, from, to } => Some(WireTransition {
                node: node.clone(),
                from: from.clone(),
                to: to.clone(),
            }),
            _ => None,
        };
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            cluster,
            new_bound,
            transition,
        }
    }
}

impl From<WireError> for RollcallError {
    fn from(err: WireError) -> Self {
        let message = err.message;
        match err.kind.as_str() {
            "configuration" => Self::Configuration(message),
            "connection" => Self::Connection(message),
            "consistency" => Self::Consistency(message),
            "not_found" => Self::NotFound(message),
            "exhaustion" => Self::Exhaustion {
                name: err.cluster.unwrap_or_default(),
                new_bound: err.new_bound.unwrap_or_default(),
            },
            "timeout" => Self::Timeout(message),
            "invalid_transition" => match err.transition {
                Some(WireTransition { node, from, to }) => Self::InvalidTransition { node, from, to },
                None => Self::Conflict(message),
            },
            "conflict" => Self::Conflict(message),
            _ => Self::InvalidInput(message),
        }
    }
}

/// Server-side method dispatch
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn call(&self, method: &str, params: Value) -> RollcallResult<Value>;
}

/// Decode call parameters
pub fn decode_params<T: DeserializeOwned>(method: &str, params: Value) -> RollcallResult<T> {
    serde_json::from_value(params)
        .map_err(|e| RollcallError::InvalidInput(format!("bad params for {method}: {e}")))
}

/// Encode a call result
pub fn encode_result<T: Serialize>(value: &T) -> RollcallResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Error for a method the handler does not serve
pub fn unknown_method(method: &str) -> RollcallError {
    RollcallError::NotFound(format!("unknown rpc method: {method}"))
}
