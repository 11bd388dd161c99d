use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// A replica group: nodes that together hold one full copy of the corpus.
///
/// Membership never changes after construction. Live figures are read straight
/// from the nodes; the coverage verdict lives in [`GroupState`], recomputed by
/// the cluster after each ping sweep.
#[derive(Debug)]
pub struct Group {
    id: u32,
    nodes: Vec<Arc<Node>>,
}

impl Group {
    /// Nodes must be ordered by distribution key.
    pub fn new(id: u32, nodes: Vec<Arc<Node>>) -> Self {
        Self { id, nodes }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn working_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_working()).count()
    }

    /// Active documents summed over the working nodes.
    pub fn active_docs(&self) -> u64 {
        self.nodes
            .iter()
            .filter(|n| n.is_working())
            .map(|n| n.active_docs())
            .sum()
    }

    /// True when any working node refuses feed.
    pub fn is_blocking_writes(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.is_working() && n.is_blocking_writes())
    }
}

/// Coverage verdict for a group as of the last completed ping sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    pub id: u32,
    pub working_nodes: usize,
    pub active_docs: u64,
    pub has_sufficient_coverage: bool,
    /// Every node in the group is working
    pub has_full_coverage: bool,
    pub is_blocking_writes: bool,
}
