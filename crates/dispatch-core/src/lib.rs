pub mod cluster_monitor;
pub mod config;
pub mod dispatcher;
pub mod group;
pub mod invoker;
pub mod load_balancer;
pub mod node;
pub mod ping;
pub mod search_cluster;
pub mod search_path;

#[cfg(test)]
mod test_utils;

pub use cluster_monitor::{ClusterMonitor, MonitorConfig};
pub use config::{DispatchConfig, DistributionPolicy, NodeConfig};
pub use dispatcher::{Dispatcher, MAX_GROUP_SELECTION_ATTEMPTS};
pub use group::{Group, GroupState};
pub use invoker::{
    CoverageErrorInvoker, FillInvoker, InterleavedSearchInvoker, InvokerFactory, NodeSearchInvoker,
    RpcFillInvoker, RpcInvokerFactory, RpcSearchInvoker, SearchInvoker, Teardown,
};
pub use load_balancer::LoadBalancer;
pub use node::{Node, NodeState};
pub use ping::{PingFactory, RpcPingFactory};
pub use search_cluster::{ClusterSnapshot, ClusterStatus, GroupStatus, NodeStatus, SearchCluster};
pub use search_path::SearchPath;
