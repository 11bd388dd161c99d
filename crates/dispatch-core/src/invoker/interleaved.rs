use async_trait::async_trait;
use dispatch_common::protocol::{Coverage, DispatchError, Query, Result, SearchResult};
use futures::future::join_all;
use tracing::debug;

use super::coverage_error::CoverageErrorInvoker;
use super::teardown::Teardown;
use super::{NodeSearchInvoker, SearchInvoker};

/// Fans a query out to every node of a selection and merges the answers.
///
/// Each node gets the query's full timeout. Requests still running at the
/// deadline are dropped. Nodes that fail or time out are counted as missing
/// coverage when incomplete coverage is accepted; otherwise they fail the attempt.
pub struct InterleavedSearchInvoker {
    invokers: Vec<Box<dyn NodeSearchInvoker>>,
    coverage_error: Option<CoverageErrorInvoker>,
    accept_incomplete_coverage: bool,
    max_hits_per_node: usize,
    teardown: Option<Teardown>,
}

impl InterleavedSearchInvoker {
    pub fn new(
        invokers: Vec<Box<dyn NodeSearchInvoker>>,
        coverage_error: Option<CoverageErrorInvoker>,
        accept_incomplete_coverage: bool,
        max_hits_per_node: u32,
    ) -> Self {
        Self {
            invokers,
            coverage_error,
            accept_incomplete_coverage,
            max_hits_per_node: max_hits_per_node as usize,
            teardown: None,
        }
    }

    pub fn accepts_incomplete_coverage(&self) -> bool {
        self.accept_incomplete_coverage
    }

    async fn run(&mut self, query: &Query) -> (Result<SearchResult>, bool) {
        let hits = query.hits_to_fetch().min(self.max_hits_per_node);
        let timeout = query.timeout();

        let requests = self.invokers.iter_mut().map(|invoker| async move {
            let key = invoker.node_key();
            let outcome = tokio::time::timeout(timeout, invoker.search(query, hits))
                .await
                .unwrap_or_else(|_| Err(DispatchError::Timeout(timeout.as_millis() as u64)));
            (key, outcome)
        });
        let outcomes = join_all(requests).await;

        let mut answered = Vec::with_capacity(outcomes.len());
        let mut failed = Vec::new();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(result) => answered.push(result),
                Err(e) => {
                    debug!(node = key, query = query.id, error = %e, "Node search failed");
                    failed.push((key, e));
                }
            }
        }
        let all_answered = failed.is_empty();

        if answered.is_empty() {
            let error = match failed.into_iter().next() {
                Some((_, e)) => e,
                None => DispatchError::NodeUnavailable(format!(
                    "none of the nodes {:?} could be reached",
                    self.node_keys()
                )),
            };
            return (Err(error), false);
        }

        if !failed.is_empty() && !self.accept_incomplete_coverage {
            let keys: Vec<u32> = failed.iter().map(|(k, _)| *k).collect();
            let (_, first) = failed.swap_remove(0);
            debug!(nodes = ?keys, "Rejecting incomplete answer");
            return (Err(first), false);
        }

        let mut partials = answered;
        if let Some(coverage_error) = &self.coverage_error {
            partials.push(coverage_error.result());
        }
        for (_, error) in &failed {
            let mut coverage = Coverage::missing_nodes(1);
            coverage.degraded.timeout = matches!(error, DispatchError::Timeout(_));
            partials.push(SearchResult {
                coverage,
                ..SearchResult::default()
            });
        }

        (Ok(merge_results(query, partials)), all_answered)
    }
}

#[async_trait]
impl SearchInvoker for InterleavedSearchInvoker {
    async fn search(&mut self, query: &Query) -> Result<SearchResult> {
        let (result, success) = self.run(query).await;
        if let Some(teardown) = self.teardown.take() {
            teardown.complete(success);
        }
        result
    }

    fn node_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.invokers.iter().map(|i| i.node_key()).collect();
        if let Some(coverage_error) = &self.coverage_error {
            keys.extend_from_slice(coverage_error.missing_nodes());
        }
        keys
    }

    fn set_teardown(&mut self, teardown: Teardown) {
        self.teardown = Some(teardown);
    }
}

/// Merges per-node results into one ranked result window.
///
/// Hits are ordered by relevance, highest first, with node key then document id
/// breaking ties; the query's offset and hit count are then applied. Hit counts,
/// coverage and errors are summed across all parts.
pub fn merge_results(query: &Query, parts: Vec<SearchResult>) -> SearchResult {
    let mut merged = SearchResult::new();
    let mut hits = Vec::new();
    for part in parts {
        hits.extend(part.hits);
        merged.total_hit_count += part.total_hit_count;
        merged.coverage.merge(&part.coverage);
        merged.errors.extend(part.errors);
    }

    hits.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then_with(|| a.node.cmp(&b.node))
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.hits = hits.into_iter().skip(query.offset).take(query.hits).collect();
    merged
}

impl std::fmt::Debug for InterleavedSearchInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterleavedSearchInvoker")
            .field("nodes", &self.node_keys())
            .field("accept_incomplete_coverage", &self.accept_incomplete_coverage)
            .finish()
    }
}
