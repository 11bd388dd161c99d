//! RPC Resource Pool
//!
//! One long-lived HTTP client shared by every search node, plus per-node failure
//! bookkeeping. A node whose connection fails `max_consecutive_failures` times in a
//! row is considered broken: [`RpcResourcePool::connection`] stops handing it out
//! until a successful call (typically a ping) restores it.
//!
//! The pool is built once from the cluster's node list and never resized. Releasing
//! it is idempotent; after release no connection is handed out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};

use crate::client::NodeClient;

pub(crate) type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// TCP connect timeout per node
    pub connect_timeout_ms: u64,
    /// Consecutive transport failures before a node's connection is marked broken
    pub max_consecutive_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            max_consecutive_failures: 3,
        }
    }
}

/// Per-node connection state.
#[derive(Debug)]
pub struct NodeConnection {
    key: u32,
    addr: String,
    client: HttpClient,
    consecutive_failures: AtomicU32,
    max_consecutive_failures: u32,
}

impl NodeConnection {
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.client
    }

    pub fn is_broken(&self) -> bool {
        self.consecutive_failures.load(Ordering::Acquire) >= self.max_consecutive_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn record_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        if previous >= self.max_consecutive_failures {
            tracing::info!(node = self.key, addr = %self.addr, "Connection restored");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures == self.max_consecutive_failures {
            tracing::warn!(
                node = self.key,
                addr = %self.addr,
                failures,
                "Connection marked broken"
            );
        }
    }
}

/// Pool of connections to the search nodes, keyed by distribution key.
#[derive(Debug)]
pub struct RpcResourcePool {
    connections: HashMap<u32, Arc<NodeConnection>>,
    released: AtomicBool,
}

impl RpcResourcePool {
    /// Creates a pool for the given `(distribution key, "host:port")` pairs.
    ///
    /// No connection is opened here; hyper connects lazily on first use.
    pub fn new<I, S>(config: &PoolConfig, nodes: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        connector.set_nodelay(true);
        let client: HttpClient = Client::builder(TokioExecutor::new()).build(connector);

        let connections = nodes
            .into_iter()
            .map(|(key, addr)| {
                let conn = NodeConnection {
                    key,
                    addr: addr.into(),
                    client: client.clone(),
                    consecutive_failures: AtomicU32::new(0),
                    max_consecutive_failures: config.max_consecutive_failures.max(1),
                };
                (key, Arc::new(conn))
            })
            .collect();

        Self {
            connections,
            released: AtomicBool::new(false),
        }
    }

    /// Returns a client for a healthy connection to `key`.
    ///
    /// `None` when the key is unknown, its connection is broken, or the pool has
    /// been released.
    pub fn connection(&self, key: u32) -> Option<NodeClient> {
        self.client(key).filter(|client| !client.connection().is_broken())
    }

    /// Returns a client for `key` whether or not its connection is broken.
    ///
    /// Pings go through here so a broken connection can be restored.
    pub fn client(&self, key: u32) -> Option<NodeClient> {
        if self.is_released() {
            return None;
        }
        self.connections
            .get(&key)
            .map(|conn| NodeClient::new(Arc::clone(conn)))
    }

    pub fn is_broken(&self, key: u32) -> bool {
        self.connections
            .get(&key)
            .map(|conn| conn.is_broken())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Releases the pool. Returns `true` only for the call that actually released it.
    pub fn release(&self) -> bool {
        let first = !self.released.swap(true, Ordering::AcqRel);
        if first {
            tracing::debug!(connections = self.connections.len(), "Released RPC resource pool");
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max_failures: u32) -> RpcResourcePool {
        let config = PoolConfig {
            connect_timeout_ms: 100,
            max_consecutive_failures: max_failures,
        };
        RpcResourcePool::new(&config, vec![(0, "127.0.0.1:1"), (1, "127.0.0.1:2")])
    }

    #[tokio::test]
    async fn test_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.connect_timeout_ms, 1000);
        assert_eq!(config.max_consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_connection_lookup() {
        let pool = pool(3);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.connection(0).map(|c| c.key()), Some(0));
        assert_eq!(pool.connection(1).map(|c| c.addr().to_string()), Some("127.0.0.1:2".into()));
        assert!(pool.connection(7).is_none());
    }

    #[tokio::test]
    async fn test_broken_after_consecutive_failures() {
        let pool = pool(2);
        let conn = pool.client(0).unwrap();

        conn.connection().record_failure();
        assert!(pool.connection(0).is_some());

        conn.connection().record_failure();
        assert!(pool.is_broken(0));
        assert!(pool.connection(0).is_none());
        // still reachable for pings
        assert!(pool.client(0).is_some());
        assert!(pool.connection(1).is_some());
    }

    #[tokio::test]
    async fn test_success_restores_connection() {
        let pool = pool(1);
        let conn = pool.client(0).unwrap();
        conn.connection().record_failure();
        assert!(pool.connection(0).is_none());

        conn.connection().record_success();
        assert!(!pool.is_broken(0));
        assert_eq!(conn.connection().consecutive_failures(), 0);
        assert!(pool.connection(0).is_some());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let pool = pool(3);
        assert!(pool.release());
        assert!(!pool.release());
        assert!(pool.is_released());
        assert!(pool.connection(0).is_none());
        assert!(pool.client(0).is_none());
    }

    #[tokio::test]
    async fn test_zero_failure_threshold_is_clamped() {
        let pool = pool(0);
        assert!(!pool.is_broken(0));
        assert!(pool.connection(0).is_some());
    }
}
