//! Cluster topology.
//!
//! [`SearchCluster`] owns the nodes and groups built from the static config and
//! answers the questions the dispatcher and load balancer ask of them: which
//! groups exist, which of them hold enough of the corpus to be queried, which are
//! blocking writes, and whether there is a co-located node to bypass them all.
//!
//! Node health is written by the cluster monitor alone. After each full sweep it
//! calls [`SearchCluster::ping_iteration_completed`], which derives a fresh
//! [`ClusterSnapshot`] and publishes it through an `ArcSwap`; readers never lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dispatch_common::protocol::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::group::{Group, GroupState};
use crate::node::{Node, NodeState};

/// Derived per-group state as of the last completed ping sweep.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// Indexed by group id
    pub groups: Vec<GroupState>,
    pub groups_with_sufficient_coverage: usize,
}

impl ClusterSnapshot {
    pub fn group(&self, id: u32) -> Option<&GroupState> {
        self.groups.get(id as usize)
    }

    pub fn blocking_write_groups(&self) -> impl Iterator<Item = &GroupState> {
        self.groups.iter().filter(|g| g.is_blocking_writes)
    }
}

#[derive(Debug, Clone, Copy)]
struct CoverageThresholds {
    min_activedocs_coverage: f64,
    min_group_coverage: f64,
    max_nodes_down_per_group: usize,
}

#[derive(Debug)]
pub struct SearchCluster {
    /// Ordered by group id, which is also the index
    groups: Vec<Arc<Group>>,
    nodes: BTreeMap<u32, Arc<Node>>,
    state: ArcSwap<ClusterSnapshot>,
    local_corpus_node: Option<Arc<Node>>,
    thresholds: CoverageThresholds,
    /// Completed ping sweeps
    sweeps: watch::Sender<u64>,
}

impl SearchCluster {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        config.validate()?;

        let mut by_group: BTreeMap<u32, Vec<_>> = BTreeMap::new();
        for node in &config.nodes {
            by_group.entry(node.group).or_default().push(node);
        }

        let mut groups = Vec::with_capacity(by_group.len());
        let mut nodes = BTreeMap::new();
        for (id, mut members) in by_group {
            members.sort_by_key(|n| n.key);
            let members: Vec<Arc<Node>> = members
                .into_iter()
                .enumerate()
                .map(|(index, n)| Arc::new(Node::new(n.key, n.host.clone(), n.port, id, index)))
                .collect();
            for node in &members {
                nodes.insert(node.key(), Arc::clone(node));
            }
            groups.push(Arc::new(Group::new(id, members)));
        }

        let local_corpus_node = find_local_corpus_node(config, &groups);
        if let Some(node) = &local_corpus_node {
            info!(node = node.key(), host = node.host(), "Found local corpus dispatch target");
        }

        let (sweeps, _) = watch::channel(0);
        let cluster = Self {
            groups,
            nodes,
            state: ArcSwap::from_pointee(ClusterSnapshot::default()),
            local_corpus_node,
            thresholds: CoverageThresholds {
                min_activedocs_coverage: config.min_activedocs_coverage,
                min_group_coverage: config.min_group_coverage,
                max_nodes_down_per_group: config.max_nodes_down_per_group,
            },
            sweeps,
        };
        // Make the cluster queryable before the first sweep
        cluster.ping_iteration_completed();
        Ok(cluster)
    }

    /// Groups in ascending id order.
    pub fn ordered_groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    pub fn group(&self, id: u32) -> Option<&Arc<Group>> {
        self.groups.get(id as usize)
    }

    pub fn node(&self, key: u32) -> Option<&Arc<Node>> {
        self.nodes.get(&key)
    }

    /// All nodes ordered by distribution key.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.state.load_full()
    }

    pub fn group_state(&self, id: u32) -> Option<GroupState> {
        self.state.load().group(id).copied()
    }

    pub fn groups_with_sufficient_coverage(&self) -> usize {
        self.state.load().groups_with_sufficient_coverage
    }

    /// The co-located node to dispatch to directly, if one exists and is usable.
    pub fn local_corpus_dispatch_target(&self) -> Option<Arc<Node>> {
        let node = self.local_corpus_node.as_ref()?;
        let sufficient = self
            .group_state(node.group())
            .map(|g| g.has_sufficient_coverage)
            .unwrap_or(false);
        if sufficient && !node.is_failed() {
            Some(Arc::clone(node))
        } else {
            None
        }
    }

    /// Notified each time [`ping_iteration_completed`](Self::ping_iteration_completed) runs.
    pub fn subscribe_sweeps(&self) -> watch::Receiver<u64> {
        self.sweeps.subscribe()
    }

    pub fn has_information_about_all_nodes(&self) -> bool {
        self.nodes.values().all(|n| n.has_responded())
    }

    /// Recomputes group coverage and blocking-writes state from current node health.
    pub fn ping_iteration_completed(&self) {
        let previous = self.state.load_full();
        let docs: Vec<u64> = self.groups.iter().map(|g| g.active_docs()).collect();

        let groups: Vec<GroupState> = self
            .groups
            .iter()
            .map(|group| {
                let working_nodes = group.working_nodes();
                let active_docs = docs[group.id() as usize];
                let docs_ok = self.is_doc_coverage_sufficient(active_docs, group.id(), &docs);
                let nodes_ok = self.is_node_coverage_sufficient(working_nodes, group.len());
                GroupState {
                    id: group.id(),
                    working_nodes,
                    active_docs,
                    has_sufficient_coverage: working_nodes > 0 && docs_ok && nodes_ok,
                    has_full_coverage: working_nodes == group.len(),
                    is_blocking_writes: group.is_blocking_writes(),
                }
            })
            .collect();

        for state in &groups {
            let was = previous.group(state.id).copied().unwrap_or_default();
            if was.has_sufficient_coverage && !state.has_sufficient_coverage {
                warn!(
                    group = state.id,
                    working = state.working_nodes,
                    active_docs = state.active_docs,
                    "Group lost sufficient coverage"
                );
            } else if !was.has_sufficient_coverage && state.has_sufficient_coverage {
                info!(group = state.id, active_docs = state.active_docs, "Group has sufficient coverage");
            }
            if was.is_blocking_writes != state.is_blocking_writes {
                debug!(group = state.id, blocking = state.is_blocking_writes, "Group write blocking changed");
            }
        }

        let groups_with_sufficient_coverage =
            groups.iter().filter(|g| g.has_sufficient_coverage).count();
        self.state.store(Arc::new(ClusterSnapshot {
            groups,
            groups_with_sufficient_coverage,
        }));
        self.sweeps.send_modify(|n| *n += 1);
    }

    /// Whether a subset of a group's nodes still covers enough of the corpus.
    ///
    /// Used when some nodes of a group cannot be reached at dispatch time.
    pub fn is_partial_group_coverage_sufficient(&self, nodes: &[Arc<Node>]) -> bool {
        let Some(first) = nodes.first() else {
            return false;
        };
        let Some(group) = self.group(first.group()) else {
            return false;
        };
        if self.groups.len() == 1 {
            return nodes.len() + self.thresholds.max_nodes_down_per_group >= group.len();
        }
        let active: u64 = nodes.iter().map(|n| n.active_docs()).sum();
        let docs: Vec<u64> = self.groups.iter().map(|g| g.active_docs()).collect();
        self.is_doc_coverage_sufficient(active, group.id(), &docs)
    }

    fn is_doc_coverage_sufficient(&self, active_docs: u64, group_id: u32, docs: &[u64]) -> bool {
        let others = docs.len().saturating_sub(1);
        if others == 0 {
            return true;
        }
        let other_docs: u64 = docs
            .iter()
            .enumerate()
            .filter(|(id, _)| *id != group_id as usize)
            .map(|(_, d)| *d)
            .sum();
        let average = other_docs as f64 / others as f64;
        if average == 0.0 {
            return true;
        }
        active_docs as f64 * 100.0 / average >= self.thresholds.min_activedocs_coverage
    }

    fn is_node_coverage_sufficient(&self, working: usize, total: usize) -> bool {
        let allowed_by_percentage =
            ((total as f64) * (100.0 - self.thresholds.min_group_coverage) / 100.0).floor() as usize;
        working + self.thresholds.max_nodes_down_per_group + allowed_by_percentage >= total
    }

    /// Serializable view of the whole cluster.
    pub fn status(&self) -> ClusterStatus {
        let snapshot = self.snapshot();
        let groups = self
            .groups
            .iter()
            .map(|group| GroupStatus {
                state: snapshot.group(group.id()).copied().unwrap_or_default(),
                nodes: group.nodes().iter().map(|n| NodeStatus::of(n)).collect(),
            })
            .collect();
        ClusterStatus {
            total_groups: self.groups.len(),
            groups_with_sufficient_coverage: snapshot.groups_with_sufficient_coverage,
            has_information_about_all_nodes: self.has_information_about_all_nodes(),
            local_corpus_dispatch_target: self.local_corpus_dispatch_target().map(|n| n.key()),
            groups,
        }
    }
}

fn find_local_corpus_node(config: &DispatchConfig, groups: &[Arc<Group>]) -> Option<Arc<Node>> {
    let hostname = config.self_hostname.as_deref()?;
    let local: Vec<&Arc<Node>> = groups
        .iter()
        .flat_map(|g| g.nodes())
        .filter(|n| n.host() == hostname)
        .collect();
    let [node] = local.as_slice() else {
        return None;
    };
    let group_size = groups.get(node.group() as usize).map(|g| g.len())?;
    if group_size != 1 || config.container_cluster_size < groups.len() {
        return None;
    }
    Some(Arc::clone(node))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeStatus {
    pub key: u32,
    pub host: String,
    pub port: u16,
    pub state: NodeState,
    pub active_docs: u64,
    pub blocking_writes: bool,
    pub last_ping_latency_us: u64,
}

impl NodeStatus {
    fn of(node: &Node) -> Self {
        Self {
            key: node.key(),
            host: node.host().to_string(),
            port: node.port(),
            state: node.state(),
            active_docs: node.active_docs(),
            blocking_writes: node.is_blocking_writes(),
            last_ping_latency_us: node.last_ping_latency().as_micros() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupStatus {
    #[serde(flatten)]
    pub state: GroupState,
    pub nodes: Vec<NodeStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterStatus {
    pub total_groups: usize,
    pub groups_with_sufficient_coverage: usize,
    pub has_information_about_all_nodes: bool,
    pub local_corpus_dispatch_target: Option<u32>,
    pub groups: Vec<GroupStatus>,
}

impl ClusterStatus {
    /// Node states keyed by distribution key.
    pub fn node_states(&self) -> HashMap<u32, NodeState> {
        self.groups
            .iter()
            .flat_map(|g| g.nodes.iter().map(|n| (n.key, n.state)))
            .collect()
    }
}
