use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Liveness of a search node as last seen by the cluster monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// No ping has completed yet
    Unknown,
    Working,
    Failed,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => NodeState::Working,
            2 => NodeState::Failed,
            _ => NodeState::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            NodeState::Unknown => 0,
            NodeState::Working => 1,
            NodeState::Failed => 2,
        }
    }
}

/// A search node and its health.
///
/// Identity is fixed at construction. The health fields are atomics written only
/// by the cluster monitor; everything else reads them without locking and may see
/// values up to one ping interval old.
#[derive(Debug)]
pub struct Node {
    key: u32,
    host: String,
    port: u16,
    group: u32,
    /// Position of this node inside its group, ordered by key
    path_index: usize,
    state: AtomicU8,
    active_docs: AtomicU64,
    target_active_docs: AtomicU64,
    blocking_writes: AtomicBool,
    last_ping_latency_us: AtomicU64,
}

impl Node {
    pub fn new(key: u32, host: impl Into<String>, port: u16, group: u32, path_index: usize) -> Self {
        Self {
            key,
            host: host.into(),
            port,
            group,
            path_index,
            state: AtomicU8::new(NodeState::Unknown.as_u8()),
            active_docs: AtomicU64::new(0),
            target_active_docs: AtomicU64::new(0),
            blocking_writes: AtomicBool::new(false),
            last_ping_latency_us: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn path_index(&self) -> usize {
        self.path_index
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_working(&self) -> bool {
        self.state() == NodeState::Working
    }

    pub fn is_failed(&self) -> bool {
        self.state() == NodeState::Failed
    }

    /// True once any ping to this node has completed, successfully or not.
    pub fn has_responded(&self) -> bool {
        self.state() != NodeState::Unknown
    }

    pub fn active_docs(&self) -> u64 {
        self.active_docs.load(Ordering::Acquire)
    }

    pub fn target_active_docs(&self) -> u64 {
        self.target_active_docs.load(Ordering::Acquire)
    }

    pub fn is_blocking_writes(&self) -> bool {
        self.blocking_writes.load(Ordering::Acquire)
    }

    pub fn last_ping_latency(&self) -> Duration {
        Duration::from_micros(self.last_ping_latency_us.load(Ordering::Acquire))
    }

    /// Records a successful ping. Returns the previous state.
    pub fn set_working(
        &self,
        active_docs: u64,
        target_active_docs: u64,
        blocking_writes: bool,
        latency: Duration,
    ) -> NodeState {
        self.active_docs.store(active_docs, Ordering::Release);
        self.target_active_docs.store(target_active_docs, Ordering::Release);
        self.blocking_writes.store(blocking_writes, Ordering::Release);
        self.last_ping_latency_us
            .store(latency.as_micros() as u64, Ordering::Release);
        NodeState::from_u8(self.state.swap(NodeState::Working.as_u8(), Ordering::AcqRel))
    }

    /// Records a failed ping. Returns the previous state.
    pub fn set_failed(&self) -> NodeState {
        NodeState::from_u8(self.state.swap(NodeState::Failed.as_u8(), Ordering::AcqRel))
    }
}
