//! Cluster builders and mock transports for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch_common::protocol::wire::Pong;
use dispatch_common::protocol::{Coverage, DispatchError, Hit, Query, Result, SearchResult};
use serde_json::json;

use crate::config::{DispatchConfig, NodeConfig};
use crate::invoker::{FillInvoker, InvokerFactory, NodeSearchInvoker};
use crate::node::Node;
use crate::ping::PingFactory;
use crate::search_cluster::SearchCluster;

/// `groups` groups of `per_group` nodes. Node `i` of group `g` has key
/// `g * per_group + i` and host `node{key}`.
pub fn config(groups: u32, per_group: u32) -> DispatchConfig {
    let nodes = (0..groups)
        .flat_map(|g| {
            (0..per_group).map(move |i| {
                let key = g * per_group + i;
                NodeConfig::new(key, format!("node{key}"), 19100, g)
            })
        })
        .collect();
    DispatchConfig::with_nodes(nodes)
}

pub fn cluster(groups: u32, per_group: u32) -> SearchCluster {
    SearchCluster::new(&config(groups, per_group)).unwrap()
}

/// Marks every node working. Group state is only derived on the next
/// `ping_iteration_completed`.
pub fn set_all_working(cluster: &SearchCluster, docs_per_node: u64) {
    for node in cluster.nodes() {
        node.set_working(docs_per_node, docs_per_node, false, Duration::from_millis(1));
    }
}

#[derive(Debug, Clone, Copy)]
enum PingBehaviour {
    Fail,
    Hang,
    BlockWrites,
}

/// Answers pings with a fixed document count unless told otherwise per node.
pub struct MockPingFactory {
    docs: u64,
    behaviour: Mutex<HashMap<u32, PingBehaviour>>,
    pings: AtomicUsize,
}

impl MockPingFactory {
    pub fn new(docs: u64) -> Self {
        Self {
            docs,
            behaviour: Mutex::new(HashMap::new()),
            pings: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, key: u32) {
        self.behaviour.lock().unwrap().insert(key, PingBehaviour::Fail);
    }

    /// Never answers; the monitor's timeout has to cut it off.
    pub fn hang(&self, key: u32) {
        self.behaviour.lock().unwrap().insert(key, PingBehaviour::Hang);
    }

    pub fn block(&self, key: u32) {
        self.behaviour.lock().unwrap().insert(key, PingBehaviour::BlockWrites);
    }

    pub fn heal(&self, key: u32) {
        self.behaviour.lock().unwrap().remove(&key);
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PingFactory for MockPingFactory {
    async fn ping(&self, node: &Node, _timeout: Duration) -> Result<Pong> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.behaviour.lock().unwrap().get(&node.key()).copied();
        match behaviour {
            None => Ok(Pong::new(self.docs)),
            Some(PingBehaviour::BlockWrites) => Ok(Pong::new(self.docs).blocking_writes()),
            Some(PingBehaviour::Fail) => Err(DispatchError::NodeUnavailable(format!(
                "node {} is down",
                node.key()
            ))),
            Some(PingBehaviour::Hang) => std::future::pending().await,
        }
    }
}

/// Node invoker returning canned hits, or failing.
pub struct MockNodeInvoker {
    key: u32,
    hits: Vec<(String, f64)>,
    fail: bool,
    delay: Option<Duration>,
    requested: Arc<Mutex<Option<usize>>>,
}

impl MockNodeInvoker {
    pub fn answering(key: u32, hits: Vec<(&str, f64)>) -> Self {
        Self {
            key,
            hits: hits.into_iter().map(|(id, r)| (id.to_string(), r)).collect(),
            fail: false,
            delay: None,
            requested: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(key: u32) -> Self {
        Self {
            fail: true,
            ..Self::answering(key, Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The hit count of the last request this invoker served.
    pub fn requested_hits(&self) -> Arc<Mutex<Option<usize>>> {
        Arc::clone(&self.requested)
    }
}

#[async_trait]
impl NodeSearchInvoker for MockNodeInvoker {
    fn node_key(&self) -> u32 {
        self.key
    }

    async fn search(&mut self, _query: &Query, hits: usize) -> Result<SearchResult> {
        *self.requested.lock().unwrap() = Some(hits);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(DispatchError::Transport(format!("node {} refused", self.key)));
        }
        Ok(SearchResult {
            hits: self
                .hits
                .iter()
                .take(hits)
                .map(|(id, r)| Hit::new(id.clone(), *r, self.key))
                .collect(),
            total_hit_count: self.hits.len() as u64,
            coverage: Coverage::new(100, 100, 1, 1),
            errors: Vec::new(),
        })
    }
}

/// Fills every hit with its own id.
pub struct MockFillInvoker;

#[async_trait]
impl FillInvoker for MockFillInvoker {
    async fn fill(&mut self, _query: &Query, result: &mut SearchResult) -> Result<()> {
        for hit in &mut result.hits {
            hit.fields = Some(json!({ "id": hit.id }));
        }
        Ok(())
    }
}

/// Factory whose nodes each return one hit, except those disconnected.
pub struct MockInvokerFactory {
    cluster: Arc<SearchCluster>,
    disconnected: Mutex<HashSet<u32>>,
    node_requests: Mutex<Vec<u32>>,
    releases: AtomicUsize,
}

impl MockInvokerFactory {
    pub fn new(cluster: Arc<SearchCluster>) -> Self {
        Self {
            cluster,
            disconnected: Mutex::new(HashSet::new()),
            node_requests: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn disconnect(&self, key: u32) {
        self.disconnected.lock().unwrap().insert(key);
    }

    /// Keys of every node an invoker was requested for, in order.
    pub fn node_requests(&self) -> Vec<u32> {
        self.node_requests.lock().unwrap().clone()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl InvokerFactory for MockInvokerFactory {
    fn search_cluster(&self) -> &Arc<SearchCluster> {
        &self.cluster
    }

    fn create_node_search_invoker(
        &self,
        _query: &Query,
        node: &Arc<Node>,
    ) -> Option<Box<dyn NodeSearchInvoker>> {
        let key = node.key();
        self.node_requests.lock().unwrap().push(key);
        if self.disconnected.lock().unwrap().contains(&key) {
            return None;
        }
        let id = format!("doc-{key}");
        let relevance = 1.0 / f64::from(key + 1);
        Some(Box::new(MockNodeInvoker::answering(key, vec![(id.as_str(), relevance)])))
    }

    fn create_fill_invoker(&self, _query: &Query, _result: &SearchResult) -> Box<dyn FillInvoker> {
        Box::new(MockFillInvoker)
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
