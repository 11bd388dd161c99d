//! Search Node Client
//!
//! JSON-RPC 2.0 over HTTP POST to a single search node. Every call carries its own
//! deadline; transport-level failures count against the node's connection in the
//! [`RpcResourcePool`](crate::RpcResourcePool), and any successful answer resets it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dispatch_common::protocol::wire::{
    DocsumRequest, DocsumResponse, NodeSearchRequest, NodeSearchResponse, PingRequest, Pong,
    METHOD_DOCSUM, METHOD_PING, METHOD_SEARCH,
};
use dispatch_common::protocol::{DispatchError, JsonRpcRequest, JsonRpcResponse, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::pool::NodeConnection;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for calling one search node. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NodeClient {
    conn: Arc<NodeConnection>,
}

impl NodeClient {
    pub(crate) fn new(conn: Arc<NodeConnection>) -> Self {
        Self { conn }
    }

    pub fn key(&self) -> u32 {
        self.conn.key()
    }

    pub fn addr(&self) -> &str {
        self.conn.addr()
    }

    pub fn connection(&self) -> &NodeConnection {
        &self.conn
    }

    pub async fn ping(&self, timeout: Duration) -> Result<Pong> {
        self.call_typed(METHOD_PING, &PingRequest {}, timeout).await
    }

    pub async fn search(
        &self,
        request: &NodeSearchRequest,
        timeout: Duration,
    ) -> Result<NodeSearchResponse> {
        self.call_typed(METHOD_SEARCH, request, timeout).await
    }

    pub async fn docsum(&self, request: &DocsumRequest, timeout: Duration) -> Result<DocsumResponse> {
        self.call_typed(METHOD_DOCSUM, request, timeout).await
    }

    async fn call_typed<P, R>(&self, method: &str, params: &P, timeout: Duration) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let value = self.call(method, params, timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| DispatchError::InvalidResponse(format!("{} from node {}: {}", method, self.key(), e)))
    }

    /// Sends a raw JSON-RPC call and returns its `result`.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let result = self.send(method, params, timeout).await;
        match &result {
            Ok(_) => self.conn.record_success(),
            Err(e) if e.is_retryable() => {
                tracing::debug!(node = self.key(), method, error = %e, "Node call failed");
                self.conn.record_failure();
            }
            // The node answered; only the request was bad
            Err(_) => self.conn.record_success(),
        }
        result
    }

    async fn send(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let request = JsonRpcRequest::new(method, params, REQUEST_ID.fetch_add(1, Ordering::Relaxed));
        let body = serde_json::to_vec(&request)?;

        let http_request = Request::builder()
            .method("POST")
            .uri(format!("http://{}/", self.conn.addr()))
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| DispatchError::Transport(format!("Failed to build request: {}", e)))?;

        let exchange = async {
            let response = self
                .conn
                .http()
                .request(http_request)
                .await
                .map_err(|e| DispatchError::Transport(format!("HTTP request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(DispatchError::NodeUnavailable(format!(
                    "node {} answered HTTP {}",
                    self.key(),
                    status
                )));
            }

            response
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .map_err(|e| DispatchError::Transport(format!("Failed to read response: {}", e)))
        };

        let bytes = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| DispatchError::Timeout(timeout.as_millis() as u64))??;

        let response: JsonRpcResponse = serde_json::from_slice(&bytes)?;
        response.into_result()
    }
}
