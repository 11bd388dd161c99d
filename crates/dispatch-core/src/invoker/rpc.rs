//! Invokers talking JSON-RPC to the search nodes through [`RpcResourcePool`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_client::{NodeClient, RpcResourcePool};
use dispatch_common::protocol::wire::{DocsumRequest, DocsumResponse, NodeSearchRequest};
use dispatch_common::protocol::{ErrorMessage, Query, Result, SearchResult};
use futures::future::join_all;
use tracing::{debug, warn};

use super::{FillInvoker, InvokerFactory, NodeSearchInvoker};
use crate::node::Node;
use crate::search_cluster::SearchCluster;

/// Runs the query on a single node.
pub struct RpcSearchInvoker {
    client: NodeClient,
}

impl RpcSearchInvoker {
    pub fn new(client: NodeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeSearchInvoker for RpcSearchInvoker {
    fn node_key(&self) -> u32 {
        self.client.key()
    }

    async fn search(&mut self, query: &Query, hits: usize) -> Result<SearchResult> {
        let request = NodeSearchRequest {
            query_id: query.id,
            body: query.body.clone(),
            hits,
            timeout_ms: query.timeout_ms,
            ranking: query.ranking.clone(),
        };
        let response = self.client.search(&request, query.timeout()).await?;
        let (hits, total_hit_count, coverage) = response.into_hits(self.client.key());
        Ok(SearchResult {
            hits,
            total_hit_count,
            coverage,
            errors: Vec::new(),
        })
    }
}

/// Fetches summaries from the nodes that produced each hit, one request per node.
pub struct RpcFillInvoker {
    pool: Arc<RpcResourcePool>,
    timeout: Duration,
}

impl RpcFillInvoker {
    pub fn new(pool: Arc<RpcResourcePool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn fetch(
        &self,
        node: u32,
        request: DocsumRequest,
    ) -> std::result::Result<DocsumResponse, ErrorMessage> {
        let Some(client) = self.pool.connection(node) else {
            return Err(ErrorMessage::backend_communication(format!(
                "no connection to node {node} for summaries"
            )));
        };
        client.docsum(&request, self.timeout).await.map_err(|e| {
            warn!(node, error = %e, "Summary request failed");
            ErrorMessage::backend_communication(format!("summary request to node {node} failed: {e}"))
        })
    }
}

#[async_trait]
impl FillInvoker for RpcFillInvoker {
    async fn fill(&mut self, query: &Query, result: &mut SearchResult) -> Result<()> {
        let mut wanted: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for hit in result.hits.iter().filter(|h| !h.is_filled()) {
            wanted.entry(hit.node).or_default().push(hit.id.clone());
        }
        if wanted.is_empty() {
            return Ok(());
        }

        let this = &*self;
        let requests = wanted.into_iter().map(|(node, ids)| {
            let request = DocsumRequest {
                summary: query.summary.clone(),
                ids,
                query: Some(query.body.clone()),
                timeout_ms: this.timeout.as_millis() as u64,
            };
            async move { (node, this.fetch(node, request).await) }
        });

        for (node, outcome) in join_all(requests).await {
            match outcome {
                Ok(response) => {
                    let mut fields: HashMap<String, serde_json::Value> = response
                        .docsums
                        .into_iter()
                        .map(|d| (d.id, d.fields))
                        .collect();
                    let mut missing = 0;
                    for hit in result.hits.iter_mut().filter(|h| h.node == node && !h.is_filled()) {
                        match fields.remove(&hit.id) {
                            Some(f) => hit.fields = Some(f),
                            None => missing += 1,
                        }
                    }
                    if missing > 0 {
                        result.add_error(ErrorMessage::backend_communication(format!(
                            "node {node} returned no summary for {missing} hits"
                        )));
                    }
                }
                Err(error) => result.add_error(error),
            }
        }
        Ok(())
    }
}

/// Production [`InvokerFactory`] backed by the shared connection pool.
pub struct RpcInvokerFactory {
    cluster: Arc<SearchCluster>,
    pool: Arc<RpcResourcePool>,
}

impl RpcInvokerFactory {
    pub fn new(cluster: Arc<SearchCluster>, pool: Arc<RpcResourcePool>) -> Self {
        Self { cluster, pool }
    }

    pub fn pool(&self) -> &Arc<RpcResourcePool> {
        &self.pool
    }
}

impl InvokerFactory for RpcInvokerFactory {
    fn search_cluster(&self) -> &Arc<SearchCluster> {
        &self.cluster
    }

    fn create_node_search_invoker(
        &self,
        _query: &Query,
        node: &Arc<Node>,
    ) -> Option<Box<dyn NodeSearchInvoker>> {
        let client = self.pool.connection(node.key());
        if client.is_none() {
            debug!(node = node.key(), "No usable connection");
        }
        client.map(|c| Box::new(RpcSearchInvoker::new(c)) as Box<dyn NodeSearchInvoker>)
    }

    fn create_fill_invoker(&self, query: &Query, _result: &SearchResult) -> Box<dyn FillInvoker> {
        Box::new(RpcFillInvoker::new(Arc::clone(&self.pool), query.timeout()))
    }

    fn release(&self) {
        self.pool.release();
    }
}
