pub mod client;
pub mod pool;

pub use client::NodeClient;
pub use pool::{NodeConnection, PoolConfig, RpcResourcePool};
