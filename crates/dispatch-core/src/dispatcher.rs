use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatch_client::RpcResourcePool;
use dispatch_common::protocol::{DispatchError, Query, Result, SearchResult};
use dispatch_metrics::{DispatchMetricsCollector, MetricsCollector, MetricsSnapshot, DISPATCH_INTERNAL};
use tracing::{debug, info, warn};

use crate::cluster_monitor::{ClusterMonitor, MonitorConfig};
use crate::config::DispatchConfig;
use crate::invoker::{FillInvoker, InvokerFactory, RpcInvokerFactory, SearchInvoker, Teardown};
use crate::load_balancer::LoadBalancer;
use crate::ping::{PingFactory, RpcPingFactory};
use crate::search_cluster::SearchCluster;
use crate::search_path::SearchPath;

/// Upper bound on the groups tried for a single query.
pub const MAX_GROUP_SELECTION_ATTEMPTS: usize = 3;

/// Operation name under which committed query attempts are timed.
const SEARCH_OPERATION: &str = "search";

/// Routes queries to the backend search nodes.
///
/// The dispatcher owns the cluster topology, the load balancer, the invoker
/// factory and the background cluster monitor. For every query it picks the
/// nodes to ask, in this order:
///
/// 1. **Search path**: an explicit node selection carried by the query.
/// 2. **Local corpus**: a single node on this host holding the whole corpus.
/// 3. **Group selection**: up to [`MAX_GROUP_SELECTION_ATTEMPTS`] groups taken
///    from the load balancer. Earlier attempts need the whole group reachable;
///    the last one accepts partial coverage.
///
/// # Attempt accounting
///
/// Every group taken from the load balancer is given back exactly once. A
/// rejected group is released immediately as a failure; a committed group is
/// released by the [`Teardown`] registered on the returned invoker, with the
/// outcome and latency of the search.
///
/// # Example
/// ```no_run
/// # use dispatch_core::{DispatchConfig, Dispatcher};
/// # use dispatch_common::protocol::Query;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DispatchConfig::from_json_file("cluster.json")?;
/// let dispatcher = Dispatcher::new(config).await?;
///
/// let mut query = Query::new(serde_json::json!({"match": "rust"}));
/// let mut invoker = dispatcher.get_search_invoker(&mut query)?;
/// let result = invoker.search(&query).await?;
/// println!("{} hits", result.total_hit_count);
///
/// dispatcher.deconstruct().await;
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher {
    cluster: Arc<SearchCluster>,
    load_balancer: Arc<LoadBalancer>,
    invoker_factory: Arc<dyn InvokerFactory>,
    monitor: ClusterMonitor,
    metrics: Arc<dyn MetricsCollector>,
    max_hits_per_node: u32,
    deconstructed: AtomicBool,
}

impl Dispatcher {
    /// Creates a dispatcher talking JSON-RPC to the configured nodes.
    ///
    /// Returns once every node has answered or failed its first ping, and not
    /// before the configured warmup has passed.
    pub async fn new(config: DispatchConfig) -> Result<Self> {
        let cluster = Arc::new(SearchCluster::new(&config)?);
        let pool = Arc::new(RpcResourcePool::new(
            &config.pool,
            cluster.nodes().map(|n| (n.key(), n.addr())),
        ));
        let invoker_factory = Arc::new(RpcInvokerFactory::new(Arc::clone(&cluster), Arc::clone(&pool)));
        let pinger = Arc::new(RpcPingFactory::new(pool));
        let metrics = Arc::new(DispatchMetricsCollector::new());

        Self::with_components(&config, cluster, invoker_factory, pinger, metrics).await
    }

    /// Creates a dispatcher from its parts.
    ///
    /// `cluster` must have been built from `config`.
    pub async fn with_components(
        config: &DispatchConfig,
        cluster: Arc<SearchCluster>,
        invoker_factory: Arc<dyn InvokerFactory>,
        pinger: Arc<dyn PingFactory>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Result<Self> {
        config.validate()?;

        let load_balancer = Arc::new(LoadBalancer::new(Arc::clone(&cluster), config.distribution_policy));
        let monitor = ClusterMonitor::start(
            Arc::clone(&cluster),
            pinger,
            Arc::clone(&metrics),
            MonitorConfig {
                interval: config.ping_interval(),
                timeout: config.ping_timeout(),
            },
        );

        wait_for_node_information(&cluster, config).await;
        cluster.ping_iteration_completed();

        info!(
            nodes = cluster.node_count(),
            groups = cluster.ordered_groups().len(),
            covered = cluster.groups_with_sufficient_coverage(),
            policy = ?config.distribution_policy,
            "Dispatcher ready"
        );

        Ok(Self {
            cluster,
            load_balancer,
            invoker_factory,
            monitor,
            metrics,
            max_hits_per_node: config.max_hits_per_node,
            deconstructed: AtomicBool::new(false),
        })
    }

    /// Chooses the nodes for a query and returns the invoker to run it with.
    ///
    /// Fails on a malformed search path, when a local corpus node cannot be
    /// reached, and when no group could take the query.
    pub fn get_search_invoker(&self, query: &mut Query) -> Result<Box<dyn SearchInvoker>> {
        if self.deconstructed.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown);
        }

        let start = Instant::now();
        let invoker = match self.search_path_invoker(query) {
            Ok(Some(invoker)) => Ok(invoker),
            Ok(None) => self.internal_invoker(query),
            Err(e) => Err(e),
        };
        self.metrics.record_call(DISPATCH_INTERNAL, start, invoker.is_ok());
        let invoker = invoker?;

        if query.estimate {
            query.hits = 0;
            query.offset = 0;
        }
        Ok(invoker)
    }

    pub fn get_fill_invoker(&self, query: &Query, result: &SearchResult) -> Box<dyn FillInvoker> {
        self.invoker_factory.create_fill_invoker(query, result)
    }

    pub fn search_cluster(&self) -> &Arc<SearchCluster> {
        &self.cluster
    }

    pub fn load_balancer(&self) -> &LoadBalancer {
        &self.load_balancer
    }

    pub fn cluster_monitor(&self) -> &ClusterMonitor {
        &self.monitor
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stops the cluster monitor, then releases transport resources.
    ///
    /// Only the first call does anything; queries after it fail with
    /// [`DispatchError::ShutDown`].
    pub async fn deconstruct(&self) {
        if self.deconstructed.swap(true, Ordering::AcqRel) {
            debug!("Dispatcher already shut down");
            return;
        }
        self.monitor.shutdown().await;
        self.invoker_factory.release();
        info!("Dispatcher shut down");
    }

    fn search_path_invoker(&self, query: &mut Query) -> Result<Option<Box<dyn SearchInvoker>>> {
        let Some(path) = query.search_path.clone() else {
            return Ok(None);
        };
        let nodes = SearchPath::select_nodes(&path, &self.cluster)?;
        if nodes.is_empty() {
            return Ok(None);
        }

        let invoker = self
            .invoker_factory
            .create_search_invoker(query, &nodes, false, self.max_hits_per_node);
        match invoker {
            Some(invoker) => {
                query.trace(2, format!("Dispatching with search path {path}"));
                Ok(Some(invoker))
            }
            None => {
                debug!(path = %path, "Search path nodes cannot be reached, using group selection");
                query.trace(2, format!("Search path {path} cannot be served, selecting a group"));
                Ok(None)
            }
        }
    }

    fn internal_invoker(&self, query: &mut Query) -> Result<Box<dyn SearchInvoker>> {
        if let Some(node) = self.cluster.local_corpus_dispatch_target() {
            query.trace(2, format!("Dispatching to {}", node.addr()));
            return self
                .invoker_factory
                .create_search_invoker(query, std::slice::from_ref(&node), false, self.max_hits_per_node)
                .ok_or_else(|| DispatchError::LocalDispatchFailed(node.addr()));
        }

        let max_attempts = max_group_selection_attempts(
            self.cluster.groups_with_sufficient_coverage(),
            self.cluster.ordered_groups().len(),
        );
        let mut rejected = self.reject_group_blocking_writes();

        for attempt in 0..max_attempts {
            let Some(group) = self.load_balancer.take_group(&rejected) else {
                break;
            };
            self.metrics.record_group_selected(group.id());

            let accept_incomplete_coverage = attempt == max_attempts - 1;
            let invoker = self.invoker_factory.create_search_invoker(
                query,
                group.nodes(),
                accept_incomplete_coverage,
                self.max_hits_per_node,
            );
            match invoker {
                Some(mut invoker) => {
                    query.trace(2, format!("Dispatching to group {}", group.id()));
                    query.search_path = Some(format!("/{}", group.id()));
                    invoker.set_teardown(self.release_on_completion(group.id()));
                    return Ok(invoker);
                }
                None => {
                    debug!(group = group.id(), attempt, "Group cannot serve the query");
                    self.load_balancer.release_group(group.id(), false, Duration::ZERO);
                    self.metrics.record_group_rejected(group.id());
                    rejected.insert(group.id());
                }
            }
        }

        self.metrics.record_no_suitable_groups();
        let mut rejected: Vec<u32> = rejected.into_iter().collect();
        rejected.sort_unstable();
        warn!(rejected = ?rejected, "No suitable groups to dispatch query");
        Err(DispatchError::NoSuitableGroups { rejected })
    }

    /// A single group blocking writes may hold stale data, so it is skipped
    /// when other groups exist. With several such groups all are kept.
    fn reject_group_blocking_writes(&self) -> HashSet<u32> {
        let snapshot = self.cluster.snapshot();
        if snapshot.groups.len() <= 1 {
            return HashSet::new();
        }
        let mut blocking = snapshot.blocking_write_groups();
        match (blocking.next(), blocking.next()) {
            (Some(group), None) => HashSet::from([group.id]),
            _ => HashSet::new(),
        }
    }

    fn release_on_completion(&self, group: u32) -> Teardown {
        let load_balancer = Arc::clone(&self.load_balancer);
        let metrics = Arc::clone(&self.metrics);
        let start = Instant::now();
        Teardown::new(move |success, latency| {
            load_balancer.release_group(group, success, latency);
            metrics.record_call(SEARCH_OPERATION, start, success);
        })
    }
}

pub(crate) fn max_group_selection_attempts(covered_groups: usize, total_groups: usize) -> usize {
    (covered_groups + 1)
        .min(total_groups)
        .min(MAX_GROUP_SELECTION_ATTEMPTS)
}

/// Waits until every node has answered or failed a ping, and at least the warmup.
async fn wait_for_node_information(cluster: &SearchCluster, config: &DispatchConfig) {
    let bound = config.warmup() + config.ping_timeout() + config.ping_interval();
    let mut sweeps = cluster.subscribe_sweeps();
    let informed = async {
        while !cluster.has_information_about_all_nodes() {
            if sweeps.changed().await.is_err() {
                break;
            }
        }
    };
    let (_, outcome) = tokio::join!(
        tokio::time::sleep(config.warmup()),
        tokio::time::timeout(bound, informed)
    );
    if outcome.is_err() {
        warn!(
            waited_ms = bound.as_millis() as u64,
            "Starting without information about all nodes"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistributionPolicy;
    use crate::test_utils::{config, MockInvokerFactory, MockPingFactory};
    use serde_json::json;

    struct Fixture {
        dispatcher: Dispatcher,
        factory: Arc<MockInvokerFactory>,
        pinger: Arc<MockPingFactory>,
    }

    async fn fixture_with(config: DispatchConfig, pinger: MockPingFactory) -> Fixture {
        let cluster = Arc::new(SearchCluster::new(&config).unwrap());
        let factory = Arc::new(MockInvokerFactory::new(Arc::clone(&cluster)));
        let pinger = Arc::new(pinger);
        let dispatcher = Dispatcher::with_components(
            &config,
            cluster,
            Arc::clone(&factory) as Arc<dyn InvokerFactory>,
            Arc::clone(&pinger) as Arc<dyn PingFactory>,
            Arc::new(DispatchMetricsCollector::new()),
        )
        .await
        .unwrap();
        Fixture {
            dispatcher,
            factory,
            pinger,
        }
    }

    async fn fixture(groups: u32, per_group: u32) -> Fixture {
        let mut cfg = config(groups, per_group);
        cfg.ping_interval_ms = 3_600_000;
        fixture_with(cfg, MockPingFactory::new(100)).await
    }

    fn group_of(keys: &[u32], per_group: u32) -> u32 {
        keys[0] / per_group
    }

    #[test]
    fn test_attempt_bounds() {
        assert_eq!(max_group_selection_attempts(0, 5), 1);
        assert_eq!(max_group_selection_attempts(5, 5), 3);
        assert_eq!(max_group_selection_attempts(1, 2), 2);
        assert_eq!(max_group_selection_attempts(1, 1), 1);
    }

    #[tokio::test]
    async fn test_construction_waits_for_first_sweep() {
        let f = fixture(3, 2).await;
        let cluster = f.dispatcher.search_cluster();
        assert!(cluster.has_information_about_all_nodes());
        assert_eq!(cluster.groups_with_sufficient_coverage(), 3);
        assert!(f.pinger.pings() >= 6);
    }

    #[tokio::test]
    async fn test_construction_honours_warmup() {
        let mut cfg = config(1, 1);
        cfg.warmup_ms = 100;
        let start = Instant::now();
        let _f = fixture_with(cfg, MockPingFactory::new(10)).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_multilevel_dispatch_rejected() {
        let mut cfg = config(1, 1);
        cfg.use_multilevel_dispatch = true;
        assert!(matches!(
            Dispatcher::new(cfg).await,
            Err(DispatchError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatches_to_one_group_and_records_path() {
        let f = fixture(2, 2).await;
        let mut query = Query::new(json!({})).with_trace_level(2);
        let mut invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();

        let keys = invoker.node_keys();
        let group = group_of(&keys, 2);
        assert_eq!(keys.len(), 2);
        assert_eq!(query.search_path, Some(format!("/{group}")));
        assert!(query.trace.iter().any(|t| t == &format!("Dispatching to group {group}")));
        assert_eq!(f.dispatcher.load_balancer().outstanding(group), 1);

        let result = invoker.search(&query).await.unwrap();
        assert!(result.coverage.is_full());
        drop(invoker);
        assert_eq!(f.dispatcher.load_balancer().outstanding(group), 0);

        let metrics = f.dispatcher.metrics();
        assert_eq!(metrics.operation(DISPATCH_INTERNAL).unwrap().call_count, 1);
        assert_eq!(metrics.operation(SEARCH_OPERATION).unwrap().success_count, 1);
        assert_eq!(metrics.groups[&group].selected, 1);
    }

    #[tokio::test]
    async fn test_search_path_bypasses_group_selection() {
        let f = fixture(3, 2).await;
        let mut query = Query::new(json!({})).with_search_path("1/2");
        let invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();

        assert_eq!(invoker.node_keys(), vec![5]);
        assert_eq!(query.search_path.as_deref(), Some("1/2"));
        for group in 0..3 {
            assert_eq!(f.dispatcher.load_balancer().outstanding(group), 0);
        }
        assert!(f.dispatcher.metrics().groups.is_empty());
    }

    #[tokio::test]
    async fn test_search_path_selecting_nothing_falls_through() {
        let f = fixture(2, 2).await;
        let mut query = Query::new(json!({})).with_search_path("0/9");
        let invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();
        assert_eq!(invoker.node_keys().len(), 2);
        assert_ne!(query.search_path.as_deref(), Some("0/9"));
    }

    #[tokio::test]
    async fn test_malformed_search_path_is_client_error() {
        let f = fixture(2, 2).await;
        let mut query = Query::new(json!({})).with_search_path("[x/0");
        let err = match f.dispatcher.get_search_invoker(&mut query) {
            Err(e) => e,
            Ok(_) => panic!("malformed path was accepted"),
        };
        assert!(err.is_client_error());
        assert!(f.factory.node_requests().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_search_path_falls_back_to_groups() {
        let f = fixture(2, 2).await;
        f.factory.disconnect(3);
        let mut query = Query::new(json!({})).with_search_path("1/1").with_trace_level(2);
        let invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();

        assert_eq!(f.factory.node_requests()[0], 3);
        let group = group_of(&invoker.node_keys(), 2);
        assert_eq!(query.search_path, Some(format!("/{group}")));
        assert_eq!(query.trace[0], "Search path 1/1 cannot be served, selecting a group");
        assert_eq!(f.dispatcher.load_balancer().outstanding(group), 1);
    }

    #[tokio::test]
    async fn test_local_corpus_target_always_used() {
        let mut cfg = config(3, 1);
        cfg.self_hostname = Some("node1".into());
        cfg.container_cluster_size = 3;
        cfg.ping_interval_ms = 3_600_000;
        let f = fixture_with(cfg, MockPingFactory::new(100)).await;

        for _ in 0..5 {
            let mut query = Query::new(json!({}));
            let invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();
            assert_eq!(invoker.node_keys(), vec![1]);
        }
        assert!(f.dispatcher.metrics().groups.is_empty());

        f.factory.disconnect(1);
        let mut query = Query::new(json!({}));
        assert!(matches!(
            f.dispatcher.get_search_invoker(&mut query),
            Err(DispatchError::LocalDispatchFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_only_last_attempt_accepts_incomplete_coverage() {
        let f = fixture(3, 2).await;
        for key in 0..6 {
            f.factory.disconnect(key);
        }

        let mut query = Query::new(json!({}));
        let invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();

        // two groups rejected, the third taken with nothing reachable
        let metrics = f.dispatcher.metrics();
        let rejected: u64 = metrics.groups.values().map(|g| g.rejected).sum();
        let selected: u64 = metrics.groups.values().map(|g| g.selected).sum();
        assert_eq!(rejected, 2);
        assert_eq!(selected, 3);
        assert_eq!(invoker.node_keys().len(), 2);

        let group = group_of(&invoker.node_keys(), 2);
        assert_eq!(metrics.groups[&group].rejected, 0);
        assert_eq!(f.dispatcher.load_balancer().outstanding(group), 1);
        drop(invoker);
        for group in 0..3 {
            assert_eq!(f.dispatcher.load_balancer().outstanding(group), 0);
        }
    }

    #[tokio::test]
    async fn test_single_uncovered_group_gets_one_attempt() {
        let mut cfg = config(5, 1);
        cfg.ping_interval_ms = 3_600_000;
        let pinger = MockPingFactory::new(100);
        for key in 0..5 {
            pinger.fail(key);
        }
        let f = fixture_with(cfg, pinger).await;
        assert_eq!(f.dispatcher.search_cluster().groups_with_sufficient_coverage(), 0);

        let mut query = Query::new(json!({}));
        let _invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();
        let selected: u64 = f.dispatcher.metrics().groups.values().map(|g| g.selected).sum();
        assert_eq!(selected, 1);
    }

    #[tokio::test]
    async fn test_single_blocking_group_pre_rejected() {
        let mut cfg = config(3, 1);
        cfg.ping_interval_ms = 3_600_000;
        cfg.distribution_policy = DistributionPolicy::RoundRobin;
        let pinger = MockPingFactory::new(100);
        pinger.block(0);
        let f = fixture_with(cfg, pinger).await;

        for _ in 0..6 {
            let mut query = Query::new(json!({}));
            let invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();
            assert_ne!(invoker.node_keys(), vec![0]);
        }
    }

    #[tokio::test]
    async fn test_two_blocking_groups_not_rejected() {
        let mut cfg = config(3, 1);
        cfg.ping_interval_ms = 3_600_000;
        cfg.distribution_policy = DistributionPolicy::RoundRobin;
        let pinger = MockPingFactory::new(100);
        pinger.block(0);
        pinger.block(1);
        let f = fixture_with(cfg, pinger).await;

        let mut seen = HashSet::new();
        for _ in 0..6 {
            let mut query = Query::new(json!({}));
            let invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();
            seen.insert(invoker.node_keys()[0]);
        }
        assert_eq!(seen, HashSet::from([0, 1, 2]));
    }

    #[tokio::test]
    async fn test_exhaustion_lists_rejected_groups() {
        let mut cfg = config(2, 1);
        cfg.ping_interval_ms = 3_600_000;
        let pinger = MockPingFactory::new(100);
        pinger.block(0);
        let f = fixture_with(cfg, pinger).await;
        f.factory.disconnect(1);

        let mut query = Query::new(json!({}));
        match f.dispatcher.get_search_invoker(&mut query) {
            Err(DispatchError::NoSuitableGroups { rejected }) => assert_eq!(rejected, vec![0, 1]),
            other => panic!("unexpected {:?}", other.map(|i| i.node_keys())),
        }
        assert_eq!(f.dispatcher.metrics().no_suitable_groups, 1);
        assert_eq!(f.dispatcher.load_balancer().outstanding(1), 0);
        let internal = f.dispatcher.metrics();
        assert_eq!(internal.operation(DISPATCH_INTERNAL).unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn test_estimate_zeroes_window() {
        let f = fixture(1, 1).await;
        let mut query = Query::new(json!({})).with_hits(20).with_offset(5);
        query.estimate = true;
        f.dispatcher.get_search_invoker(&mut query).unwrap();
        assert_eq!((query.hits, query.offset), (0, 0));
    }

    #[tokio::test]
    async fn test_fill_invoker_fills_hits() {
        let f = fixture(1, 2).await;
        let mut query = Query::new(json!({}));
        let mut invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();
        let mut result = invoker.search(&query).await.unwrap();
        assert!(!result.hits.is_empty());

        let mut fill = f.dispatcher.get_fill_invoker(&query, &result);
        fill.fill(&query, &mut result).await.unwrap();
        assert!(result.hits.iter().all(|h| h.is_filled()));
    }

    #[tokio::test]
    async fn test_deconstruct_is_idempotent() {
        let f = fixture(2, 1).await;
        f.dispatcher.deconstruct().await;
        f.dispatcher.deconstruct().await;

        assert_eq!(f.factory.releases(), 1);
        assert!(!f.dispatcher.cluster_monitor().is_running());
        let mut query = Query::new(json!({}));
        assert!(matches!(
            f.dispatcher.get_search_invoker(&mut query),
            Err(DispatchError::ShutDown)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_balance_take_and_release() {
        let f = Arc::new(fixture(3, 2).await);
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let f = Arc::clone(&f);
                tokio::spawn(async move {
                    let mut query = Query::new(json!({}));
                    let mut invoker = f.dispatcher.get_search_invoker(&mut query).unwrap();
                    if i % 2 == 0 {
                        invoker.search(&query).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        for group in 0..3 {
            assert_eq!(f.dispatcher.load_balancer().outstanding(group), 0);
        }
    }
}
