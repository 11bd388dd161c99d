// Copyright 2026 Dispatch Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::snapshot::{GroupMetrics, MetricsSnapshot, NodeMetrics, OperationMetrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Ten bins per decade from 1μs up to 10s.
const BINS_PER_DECADE: usize = 10;
const NUM_DECADES: usize = 7;
const NUM_HISTOGRAM_BINS: usize = BINS_PER_DECADE * NUM_DECADES;

/// Lock-free latency histogram with logarithmic bins.
///
/// Recording is a single atomic increment. Percentiles are estimated from the bin
/// boundaries, so they are approximate but stable in memory regardless of how many
/// samples have been seen.
#[derive(Debug)]
pub(crate) struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    pub(crate) fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(&self, latency_us: u64) {
        self.bins[Self::bin_of(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    fn bin_of(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10() as usize;
        let leading = (latency_us / 10u64.pow(decade as u32)) as usize;
        (decade * BINS_PER_DECADE + leading).min(NUM_HISTOGRAM_BINS - 1)
    }

    /// Lower bound of a bin in microseconds.
    fn lower_bound(bin: usize) -> u64 {
        let decade = (bin / BINS_PER_DECADE) as u32;
        let leading = (bin % BINS_PER_DECADE).max(1) as u64;
        10u64.pow(decade) * leading
    }

    pub(crate) fn percentile(&self, percentile: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let target = (total * percentile).div_ceil(100).max(1);
        let mut cumulative = 0;
        for (bin, count) in self.bins.iter().enumerate() {
            cumulative += count.load(Ordering::Relaxed);
            if cumulative >= target {
                return Self::lower_bound(bin);
            }
        }
        Self::lower_bound(NUM_HISTOGRAM_BINS - 1)
    }

    pub(crate) fn count(&self) -> u64 {
        self.sample_count.load(Ordering::Relaxed)
    }

    pub(crate) fn average(&self) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        self.total_latency.load(Ordering::Relaxed) / total
    }
}

#[derive(Debug)]
struct OperationStats {
    success_count: AtomicU64,
    failure_count: AtomicU64,
    latencies: LatencyHistogram,
}

impl OperationStats {
    fn new() -> Self {
        Self {
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
        }
    }

    fn to_metrics(&self) -> OperationMetrics {
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        OperationMetrics {
            call_count: success_count + failure_count,
            success_count,
            failure_count,
            avg_latency_us: self.latencies.average(),
            p50_latency_us: self.latencies.percentile(50),
            p95_latency_us: self.latencies.percentile(95),
            p99_latency_us: self.latencies.percentile(99),
        }
    }
}

#[derive(Debug, Default)]
struct PairCounter {
    first: AtomicU64,
    second: AtomicU64,
}

impl PairCounter {
    fn load(&self) -> (u64, u64) {
        (self.first.load(Ordering::Relaxed), self.second.load(Ordering::Relaxed))
    }
}

/// Thread-safe storage for the dispatch metrics.
///
/// Counters are atomics; the maps from name or id to counters sit behind an
/// `RwLock` that is only taken for writing the first time a key is seen.
#[derive(Debug)]
pub struct MetricsRegistry {
    operations: RwLock<HashMap<String, Arc<OperationStats>>>,
    groups: RwLock<HashMap<u32, Arc<PairCounter>>>,
    nodes: RwLock<HashMap<u32, Arc<PairCounter>>>,
    no_suitable_groups: AtomicU64,
    start_time: Instant,
}

/// Returns the entry for `key`, inserting it on first use.
fn entry<K, V>(map: &RwLock<HashMap<K, Arc<V>>>, key: &K, make: impl FnOnce() -> V) -> Arc<V>
where
    K: std::hash::Hash + Eq + Clone,
{
    if let Ok(read) = map.read() {
        if let Some(value) = read.get(key) {
            return Arc::clone(value);
        }
    }
    let mut write = map.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(write.entry(key.clone()).or_insert_with(|| Arc::new(make())))
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            no_suitable_groups: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_operation(&self, operation: &str, latency_us: u64, success: bool) {
        let stats = entry(&self.operations, &operation.to_string(), OperationStats::new);
        if success {
            stats.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        stats.latencies.record(latency_us);
    }

    pub fn record_group_selected(&self, group: u32) {
        entry(&self.groups, &group, PairCounter::default)
            .first
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_rejected(&self, group: u32) {
        entry(&self.groups, &group, PairCounter::default)
            .second
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ping(&self, node: u32, success: bool) {
        let counter = entry(&self.nodes, &node, PairCounter::default);
        counter.first.fetch_add(1, Ordering::Relaxed);
        if !success {
            counter.second.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_no_suitable_groups(&self) {
        self.no_suitable_groups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            uptime_ms: self.uptime_ms(),
            no_suitable_groups: self.no_suitable_groups.load(Ordering::Relaxed),
            ..MetricsSnapshot::default()
        };

        if let Ok(operations) = self.operations.read() {
            for (name, stats) in operations.iter() {
                snapshot.operations.insert(name.clone(), stats.to_metrics());
            }
        }
        if let Ok(groups) = self.groups.read() {
            for (id, counter) in groups.iter() {
                let (selected, rejected) = counter.load();
                snapshot.groups.insert(*id, GroupMetrics { selected, rejected });
            }
        }
        if let Ok(nodes) = self.nodes.read() {
            for (key, counter) in nodes.iter() {
                let (pings, ping_failures) = counter.load();
                snapshot.nodes.insert(*key, NodeMetrics { pings, ping_failures });
            }
        }
        snapshot
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_bins() {
        assert_eq!(LatencyHistogram::bin_of(0), 0);
        assert_eq!(LatencyHistogram::bin_of(5), 5);
        assert_eq!(LatencyHistogram::bin_of(10), 11);
        assert_eq!(LatencyHistogram::bin_of(250), 22);
        assert_eq!(LatencyHistogram::bin_of(u64::MAX), NUM_HISTOGRAM_BINS - 1);
        assert_eq!(LatencyHistogram::lower_bound(22), 200);
    }

    #[test]
    fn test_histogram_percentiles() {
        let histogram = LatencyHistogram::new();
        assert_eq!(histogram.percentile(50), 0);

        for _ in 0..90 {
            histogram.record(100);
        }
        for _ in 0..10 {
            histogram.record(5000);
        }
        assert_eq!(histogram.count(), 100);
        assert_eq!(histogram.percentile(50), 100);
        assert_eq!(histogram.percentile(99), 5000);
        assert_eq!(histogram.average(), 590);
    }

    #[test]
    fn test_record_operation() {
        let registry = MetricsRegistry::new();
        registry.record_operation("dispatch_internal", 100, true);
        registry.record_operation("dispatch_internal", 200, false);

        let snapshot = registry.snapshot();
        let metrics = snapshot.operation("dispatch_internal").unwrap();
        assert_eq!(metrics.call_count, 2);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.avg_latency_us, 150);
    }

    #[test]
    fn test_group_and_node_counters() {
        let registry = MetricsRegistry::new();
        registry.record_group_selected(1);
        registry.record_group_selected(1);
        registry.record_group_rejected(1);
        registry.record_ping(4, true);
        registry.record_ping(4, false);
        registry.record_no_suitable_groups();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.groups[&1], GroupMetrics { selected: 2, rejected: 1 });
        assert_eq!(snapshot.nodes[&4], NodeMetrics { pings: 2, ping_failures: 1 });
        assert_eq!(snapshot.no_suitable_groups, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        registry.record_operation("search", i, true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.snapshot().operation("search").unwrap().call_count, 8000);
    }
}
