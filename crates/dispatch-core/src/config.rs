//! Dispatch configuration.
//!
//! The static cluster topology and tuning knobs, loaded once at startup from a JSON
//! document. Everything has a default except the node list.
//!
//! ```json
//! {
//!   "nodes": [
//!     { "key": 0, "host": "search0.local", "port": 19100, "group": 0 },
//!     { "key": 1, "host": "search1.local", "port": 19100, "group": 1 }
//!   ],
//!   "distribution_policy": "adaptive",
//!   "ping_interval_ms": 1000
//! }
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use dispatch_client::PoolConfig;
use dispatch_common::protocol::{DispatchError, Result};
use serde::{Deserialize, Serialize};

/// How the load balancer picks the next group.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    /// Cycle through the groups in id order
    RoundRobin,
    /// Prefer the group with the least outstanding work relative to its speed
    #[default]
    Adaptive,
}

/// One search node in the static topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Distribution key, unique across the cluster
    pub key: u32,
    pub host: String,
    pub port: u16,
    /// Group (row) this node belongs to
    pub group: u32,
}

impl NodeConfig {
    pub fn new(key: u32, host: impl Into<String>, port: u16, group: u32) -> Self {
        Self {
            key,
            host: host.into(),
            port,
            group,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub nodes: Vec<NodeConfig>,
    pub distribution_policy: DistributionPolicy,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    /// Percentage of the other groups' average active documents a group must hold
    pub min_activedocs_coverage: f64,
    /// Percentage of a group's nodes that must be up
    pub min_group_coverage: f64,
    pub max_nodes_down_per_group: usize,
    /// Minimum time construction waits before the dispatcher is handed out
    pub warmup_ms: u64,
    pub max_hits_per_node: u32,
    pub search_timeout_ms: u64,
    /// Not supported; set to fail construction
    pub use_multilevel_dispatch: bool,
    /// Host this process runs on, used to find a co-located node
    pub self_hostname: Option<String>,
    /// Number of containers serving this content cluster
    pub container_cluster_size: usize,
    pub pool: PoolConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            distribution_policy: DistributionPolicy::default(),
            ping_interval_ms: 1000,
            ping_timeout_ms: 500,
            min_activedocs_coverage: 97.0,
            min_group_coverage: 100.0,
            max_nodes_down_per_group: 0,
            warmup_ms: 0,
            max_hits_per_node: u32::MAX,
            search_timeout_ms: 5000,
            use_multilevel_dispatch: false,
            self_hostname: None,
            container_cluster_size: 1,
            pool: PoolConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn with_nodes(nodes: Vec<NodeConfig>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DispatchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    /// Number of distinct groups in the topology.
    pub fn group_count(&self) -> usize {
        self.nodes.iter().map(|n| n.group).collect::<BTreeSet<_>>().len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.use_multilevel_dispatch {
            return Err(DispatchError::Configuration(
                "Multilevel dispatch is not supported".to_string(),
            ));
        }
        if self.nodes.is_empty() {
            return Err(DispatchError::Configuration("No search nodes configured".to_string()));
        }

        let mut keys = HashSet::new();
        for node in &self.nodes {
            if !keys.insert(node.key) {
                return Err(DispatchError::Configuration(format!(
                    "Duplicate distribution key {}",
                    node.key
                )));
            }
        }

        let groups: BTreeSet<u32> = self.nodes.iter().map(|n| n.group).collect();
        if groups.iter().copied().ne(0..groups.len() as u32) {
            return Err(DispatchError::Configuration(format!(
                "Group ids must be dense from 0, got {:?}",
                groups
            )));
        }

        for (name, value) in [
            ("min_activedocs_coverage", self.min_activedocs_coverage),
            ("min_group_coverage", self.min_group_coverage),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(DispatchError::Configuration(format!(
                    "{} must be a percentage, got {}",
                    name, value
                )));
            }
        }

        if self.ping_interval_ms == 0 {
            return Err(DispatchError::Configuration(
                "ping_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_hits_per_node == 0 {
            return Err(DispatchError::Configuration(
                "max_hits_per_node must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
