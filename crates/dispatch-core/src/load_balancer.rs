//! Group selection.
//!
//! The load balancer decides which group serves the next query attempt and keeps
//! track of how many attempts each group is serving. All state is per group:
//! an atomic outstanding counter and a small latency estimate behind its own
//! mutex. There is no lock spanning groups, so concurrent queries only contend
//! when they touch the same group.
//!
//! Groups are tiered before a policy is applied: those with sufficient coverage
//! first, then those with at least one working node, then anything not rejected.
//! A group lacking coverage is only chosen when nothing better is left.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::config::DistributionPolicy;
use crate::group::Group;
use crate::search_cluster::{ClusterSnapshot, SearchCluster};

/// Latency assumed for a group that has not completed any query yet.
const INITIAL_LATENCY_MS: f64 = 10.0;
/// Floor on the smoothing factor so the estimate keeps following the group.
const MIN_ALPHA: f64 = 0.1;
const MIN_LATENCY_MS: f64 = 0.01;

/// Exponentially weighted latency estimate.
///
/// The first sample replaces the initial guess outright; the weight of each new
/// sample then decays as `1/(n+1)` until it reaches [`MIN_ALPHA`].
#[derive(Debug, Clone, Copy)]
struct LatencyEstimate {
    samples: u64,
    latency_ms: f64,
}

impl LatencyEstimate {
    fn new() -> Self {
        Self {
            samples: 0,
            latency_ms: INITIAL_LATENCY_MS,
        }
    }

    fn update(&mut self, latency: Duration) {
        let sample = (latency.as_secs_f64() * 1000.0).max(MIN_LATENCY_MS);
        let alpha = (1.0 / (self.samples as f64 + 1.0)).max(MIN_ALPHA);
        self.latency_ms = alpha * sample + (1.0 - alpha) * self.latency_ms;
        self.samples += 1;
    }
}

#[derive(Debug)]
struct GroupLoad {
    outstanding: AtomicUsize,
    latency: Mutex<LatencyEstimate>,
}

impl GroupLoad {
    fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            latency: Mutex::new(LatencyEstimate::new()),
        }
    }

    fn latency_ms(&self) -> f64 {
        self.latency
            .lock()
            .map(|estimate| estimate.latency_ms)
            .unwrap_or(INITIAL_LATENCY_MS)
    }

    /// `outstanding / capacity`, with capacity taken as the inverse of latency.
    fn score(&self) -> f64 {
        (self.outstanding.load(Ordering::Acquire) as f64 + 1.0) * self.latency_ms()
    }
}

pub struct LoadBalancer {
    cluster: Arc<SearchCluster>,
    policy: DistributionPolicy,
    groups: Vec<GroupLoad>,
    /// Round-robin position: the index scanning starts from
    needle: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(cluster: Arc<SearchCluster>, policy: DistributionPolicy) -> Self {
        let groups = cluster.ordered_groups().iter().map(|_| GroupLoad::new()).collect();
        Self {
            cluster,
            policy,
            groups,
            needle: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> DistributionPolicy {
        self.policy
    }

    /// Picks a group not in `rejected` and counts an outstanding attempt on it.
    ///
    /// Every group returned here must be handed back through
    /// [`release_group`](Self::release_group) exactly once.
    pub fn take_group(&self, rejected: &HashSet<u32>) -> Option<Arc<Group>> {
        let snapshot = self.cluster.snapshot();
        let index = match self.policy {
            DistributionPolicy::RoundRobin => self.select_round_robin(&snapshot, rejected),
            DistributionPolicy::Adaptive => self.select_adaptive(&snapshot, rejected),
        }?;

        self.groups[index].outstanding.fetch_add(1, Ordering::AcqRel);
        self.cluster.ordered_groups().get(index).cloned()
    }

    /// Hands a group back after an attempt.
    ///
    /// Only successful attempts feed the latency estimate.
    pub fn release_group(&self, group_id: u32, success: bool, latency: Duration) {
        let Some(load) = self.groups.get(group_id as usize) else {
            warn!(group = group_id, "Released unknown group");
            return;
        };

        let decremented = load
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if decremented.is_err() {
            warn!(group = group_id, "Released a group with no outstanding attempts");
        }

        if success {
            if let Ok(mut estimate) = load.latency.lock() {
                estimate.update(latency);
            }
        }
    }

    pub fn outstanding(&self, group_id: u32) -> usize {
        self.groups
            .get(group_id as usize)
            .map(|g| g.outstanding.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Current latency estimate for a group in milliseconds.
    pub fn latency_estimate_ms(&self, group_id: u32) -> Option<f64> {
        self.groups.get(group_id as usize).map(|g| g.latency_ms())
    }

    /// 0 for groups with sufficient coverage, 1 for groups with a working node, 2 otherwise.
    fn tier(snapshot: &ClusterSnapshot, index: usize) -> u8 {
        match snapshot.groups.get(index) {
            Some(state) if state.has_sufficient_coverage => 0,
            Some(state) if state.working_nodes > 0 => 1,
            _ => 2,
        }
    }

    fn select_round_robin(&self, snapshot: &ClusterSnapshot, rejected: &HashSet<u32>) -> Option<usize> {
        let count = self.groups.len();
        if count == 0 {
            return None;
        }

        // The needle only moves past the group actually chosen from that start
        let mut chosen = None;
        let _ = self
            .needle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |needle| {
                chosen = Self::scan_round_robin(snapshot, rejected, count, needle % count);
                chosen.map(|index| (index + 1) % count)
            });
        chosen
    }

    fn scan_round_robin(
        snapshot: &ClusterSnapshot,
        rejected: &HashSet<u32>,
        count: usize,
        start: usize,
    ) -> Option<usize> {
        let mut best: Option<(u8, usize)> = None;
        for offset in 0..count {
            let index = (start + offset) % count;
            if rejected.contains(&(index as u32)) {
                continue;
            }
            let tier = Self::tier(snapshot, index);
            if best.map_or(true, |(best_tier, _)| tier < best_tier) {
                best = Some((tier, index));
            }
        }
        best.map(|(_, index)| index)
    }

    fn select_adaptive(&self, snapshot: &ClusterSnapshot, rejected: &HashSet<u32>) -> Option<usize> {
        let mut best: Option<(u8, f64, usize)> = None;
        for (index, load) in self.groups.iter().enumerate() {
            if rejected.contains(&(index as u32)) {
                continue;
            }
            let tier = Self::tier(snapshot, index);
            let score = load.score();
            let better = match best {
                None => true,
                // Scanning in id order, so ties keep the lower id
                Some((best_tier, best_score, _)) => {
                    tier < best_tier || (tier == best_tier && score < best_score)
                }
            };
            if better {
                best = Some((tier, score, index));
            }
        }
        best.map(|(_, _, index)| index)
    }
}
