//! Dispatch Metrics
//!
//! Counters and latency histograms for the dispatch core: how long each query
//! spent in the dispatcher, which groups were picked or turned down, how pings
//! went, and how often a query found no group at all.
//!
//! - [`MetricsRegistry`]: atomic storage, safe to share across threads via `Arc`
//! - [`MetricsCollector`]: the trait the dispatcher reports through
//! - [`MetricsSnapshot`]: serializable point-in-time view

mod collector;
mod registry;
mod snapshot;

pub use collector::{DispatchMetricsCollector, MetricsCollector, DISPATCH_INTERNAL};
pub use registry::MetricsRegistry;
pub use snapshot::{GroupMetrics, MetricsSnapshot, NodeMetrics, OperationMetrics};
