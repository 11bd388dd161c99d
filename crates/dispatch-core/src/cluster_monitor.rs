//! Background health monitoring.
//!
//! The monitor pings every node on a fixed interval. Pings within a sweep run
//! concurrently, each bounded by the ping timeout, and the sweep ends with
//! [`SearchCluster::ping_iteration_completed`]. A failed ping marks the node
//! failed and is otherwise absorbed; the loop only stops on shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatch_common::protocol::{DispatchError, Result};
use dispatch_common::protocol::wire::Pong;
use dispatch_metrics::MetricsCollector;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::node::{Node, NodeState};
use crate::ping::PingFactory;
use crate::search_cluster::SearchCluster;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_millis(500),
        }
    }
}

struct Sweeper {
    cluster: Arc<SearchCluster>,
    pinger: Arc<dyn PingFactory>,
    metrics: Arc<dyn MetricsCollector>,
    timeout: Duration,
}

impl Sweeper {
    async fn ping_all(&self) {
        let pings: Vec<_> = self
            .cluster
            .nodes()
            .map(|node| async move {
                let start = Instant::now();
                let result = tokio::time::timeout(self.timeout, self.pinger.ping(node, self.timeout))
                    .await
                    .unwrap_or_else(|_| Err(DispatchError::Timeout(self.timeout.as_millis() as u64)));
                (node, result, start.elapsed())
            })
            .collect();

        for (node, result, latency) in futures::future::join_all(pings).await {
            self.metrics.record_ping(node.key(), result.is_ok());
            Self::apply(node, result, latency);
        }
        self.cluster.ping_iteration_completed();
    }

    fn apply(node: &Node, result: Result<Pong>, latency: Duration) {
        match result {
            Ok(pong) => {
                let target = pong.target_active_docs.unwrap_or(pong.active_docs);
                let previous = node.set_working(pong.active_docs, target, pong.blocking_writes, latency);
                match previous {
                    NodeState::Failed => info!(node = node.key(), addr = %node.addr(), "Node is working again"),
                    NodeState::Unknown => debug!(node = node.key(), docs = pong.active_docs, "Node is working"),
                    NodeState::Working => {}
                }
            }
            Err(e) => {
                let previous = node.set_failed();
                if previous != NodeState::Failed {
                    warn!(node = node.key(), addr = %node.addr(), error = %e, "Node failed ping");
                }
            }
        }
    }
}

/// Handle to the running monitor task.
pub struct ClusterMonitor {
    sweeper: Arc<Sweeper>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterMonitor {
    /// Spawns the monitor loop. The first sweep starts immediately.
    pub fn start(
        cluster: Arc<SearchCluster>,
        pinger: Arc<dyn PingFactory>,
        metrics: Arc<dyn MetricsCollector>,
        config: MonitorConfig,
    ) -> Self {
        let sweeper = Arc::new(Sweeper {
            cluster,
            pinger,
            metrics,
            timeout: config.timeout,
        });
        let cancel = CancellationToken::new();

        let task_sweeper = Arc::clone(&sweeper);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = task_cancel.cancelled() => break,
                            _ = task_sweeper.ping_all() => {}
                        }
                    }
                }
            }
            debug!("Cluster monitor stopped");
        });

        Self {
            sweeper,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Runs one sweep on the caller's task.
    pub async fn ping_all(&self) {
        self.sweeper.ping_all().await;
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stops the loop and waits for it to exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cluster monitor task ended abnormally");
            }
            info!("Cluster monitor shut down");
        }
    }
}

impl Drop for ClusterMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
