use std::sync::Arc;

use dispatch_common::protocol::{Query, SearchResult};
use tracing::debug;

use super::coverage_error::CoverageErrorInvoker;
use super::interleaved::InterleavedSearchInvoker;
use super::{FillInvoker, NodeSearchInvoker, SearchInvoker};
use crate::node::Node;
use crate::search_cluster::SearchCluster;

/// Builds the invokers for a query attempt.
///
/// Implementors supply the per-node pieces; assembling them into a search
/// invoker for a node selection, with its coverage checks, is shared.
pub trait InvokerFactory: Send + Sync {
    fn search_cluster(&self) -> &Arc<SearchCluster>;

    /// An invoker for one node, or `None` if there is no usable connection to it.
    fn create_node_search_invoker(
        &self,
        query: &Query,
        node: &Arc<Node>,
    ) -> Option<Box<dyn NodeSearchInvoker>>;

    fn create_fill_invoker(&self, query: &Query, result: &SearchResult) -> Box<dyn FillInvoker>;

    /// Releases transport resources. Called once when the dispatcher is torn down.
    fn release(&self) {}

    /// Creates an invoker querying every reachable node of `nodes`.
    ///
    /// Returns `None` when reachable nodes would not give sufficient coverage and
    /// `accept_incomplete_coverage` is false, so the caller can try another group.
    /// Nodes that are failed or unreachable become missing coverage in the result.
    fn create_search_invoker(
        &self,
        query: &Query,
        nodes: &[Arc<Node>],
        accept_incomplete_coverage: bool,
        max_hits_per_node: u32,
    ) -> Option<Box<dyn SearchInvoker>> {
        let mut invokers = Vec::with_capacity(nodes.len());
        let mut reachable = Vec::with_capacity(nodes.len());
        let mut missing = Vec::new();

        for node in nodes {
            let invoker = if node.is_failed() {
                None
            } else {
                self.create_node_search_invoker(query, node)
            };
            match invoker {
                Some(invoker) => {
                    invokers.push(invoker);
                    reachable.push(Arc::clone(node));
                }
                None => missing.push(node.key()),
            }
        }

        if !missing.is_empty()
            && !accept_incomplete_coverage
            && !self.search_cluster().is_partial_group_coverage_sufficient(&reachable)
        {
            debug!(missing = ?missing, "Too many unreachable nodes for sufficient coverage");
            return None;
        }
        if invokers.is_empty() && !accept_incomplete_coverage {
            return None;
        }

        let coverage_error = (!missing.is_empty()).then(|| CoverageErrorInvoker::new(missing));
        Some(Box::new(InterleavedSearchInvoker::new(
            invokers,
            coverage_error,
            accept_incomplete_coverage,
            max_hits_per_node,
        )))
    }
}
