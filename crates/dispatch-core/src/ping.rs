use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_client::RpcResourcePool;
use dispatch_common::protocol::wire::Pong;
use dispatch_common::protocol::{DispatchError, Result};

use crate::node::Node;

/// Issues liveness pings to search nodes.
#[async_trait]
pub trait PingFactory: Send + Sync {
    async fn ping(&self, node: &Node, timeout: Duration) -> Result<Pong>;
}

/// Pings nodes over the shared RPC pool.
///
/// Goes through [`RpcResourcePool::client`] rather than `connection` so that a
/// successful ping can restore a connection the pool has marked broken.
pub struct RpcPingFactory {
    pool: Arc<RpcResourcePool>,
}

impl RpcPingFactory {
    pub fn new(pool: Arc<RpcResourcePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PingFactory for RpcPingFactory {
    async fn ping(&self, node: &Node, timeout: Duration) -> Result<Pong> {
        match self.pool.client(node.key()) {
            Some(client) => client.ping(timeout).await,
            None if self.pool.is_released() => Err(DispatchError::ShutDown),
            None => Err(DispatchError::NodeUnavailable(format!(
                "no connection configured for node {}",
                node.key()
            ))),
        }
    }
}
