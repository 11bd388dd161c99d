//! JSON-RPC 2.0 Envelope
//!
//! Search nodes are reached with JSON-RPC 2.0 over HTTP POST. This module holds the
//! envelope types; the payloads themselves live in [`super::wire`].
//!
//! # Error Codes
//!
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//! - `-32000`: Node-side failure while serving the request
//! - `-32001`: Node is overloaded and shed the request
//!
//! # Example
//!
//! ```
//! use dispatch_common::protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
//! use serde_json::json;
//!
//! let request = JsonRpcRequest::new("search.ping", json!({}), 7);
//! let response = JsonRpcResponse::success(request.id.clone(), json!({"active_docs": 10}));
//! assert_eq!(response.into_result().unwrap(), json!({"active_docs": 10}));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{DispatchError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NODE_ERROR: i32 = -32000;
pub const NODE_OVERLOADED: i32 = -32001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: Value,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
            id: Value::from(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params(msg: &str) -> Self {
        Self::new(INVALID_PARAMS, msg)
    }

    pub fn node_error(msg: &str) -> Self {
        Self::new(NODE_ERROR, msg)
    }

    /// Errors where the node itself is fine but could not serve right now.
    pub fn is_transient(&self) -> bool {
        matches!(self.code, NODE_OVERLOADED | INTERNAL_ERROR)
    }
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Unwraps the envelope, mapping a JSON-RPC error onto the dispatch taxonomy.
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(if error.is_transient() {
                DispatchError::NodeUnavailable(error.message)
            } else {
                DispatchError::Backend(format!("{} (code {})", error.message, error.code))
            });
        }
        self.result
            .ok_or_else(|| DispatchError::InvalidResponse("Response missing result".to_string()))
    }
}
