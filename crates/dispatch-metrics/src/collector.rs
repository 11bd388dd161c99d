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

use crate::registry::MetricsRegistry;
use crate::snapshot::MetricsSnapshot;
use std::sync::Arc;
use std::time::Instant;

/// Name under which every query handled by the dispatcher is timed.
pub const DISPATCH_INTERNAL: &str = "dispatch_internal";

/// Sink for the events the dispatch core reports.
///
/// The dispatcher and cluster monitor only ever see this trait, so tests can plug
/// in their own collector and production code can share one registry across
/// several dispatchers.
pub trait MetricsCollector: Send + Sync {
    /// Records one completed operation with its latency.
    fn record_call(&self, operation: &str, start_time: Instant, success: bool);

    /// Records that a group was chosen for a query attempt.
    fn record_group_selected(&self, group: u32);

    /// Records that a chosen group could not serve the query.
    fn record_group_rejected(&self, group: u32);

    fn record_ping(&self, node: u32, success: bool);

    /// Records a query that exhausted every group.
    fn record_no_suitable_groups(&self);

    fn snapshot(&self) -> MetricsSnapshot;
}

/// Registry-backed collector used by the dispatcher.
///
/// # Example
///
/// ```rust
/// use dispatch_metrics::{DispatchMetricsCollector, MetricsCollector, DISPATCH_INTERNAL};
/// use std::time::Instant;
///
/// let collector = DispatchMetricsCollector::new();
/// collector.record_call(DISPATCH_INTERNAL, Instant::now(), true);
/// collector.record_group_selected(0);
///
/// let snapshot = collector.snapshot();
/// assert_eq!(snapshot.operation(DISPATCH_INTERNAL).unwrap().call_count, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DispatchMetricsCollector {
    registry: Arc<MetricsRegistry>,
}

impl DispatchMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collector over a shared registry.
    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }
}

impl MetricsCollector for DispatchMetricsCollector {
    fn record_call(&self, operation: &str, start_time: Instant, success: bool) {
        let latency_us = start_time.elapsed().as_micros() as u64;
        self.registry.record_operation(operation, latency_us, success);
    }

    fn record_group_selected(&self, group: u32) {
        self.registry.record_group_selected(group);
    }

    fn record_group_rejected(&self, group: u32) {
        self.registry.record_group_rejected(group);
    }

    fn record_ping(&self, node: u32, success: bool) {
        self.registry.record_ping(node, success);
    }

    fn record_no_suitable_groups(&self) {
        self.registry.record_no_suitable_groups();
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }
}
