//! Invokers: the per-query fan-out objects.
//!
//! A [`SearchInvoker`] is built for one query attempt against a fixed set of
//! nodes, runs the query on all of them in parallel and merges the answers. A
//! [`FillInvoker`] fetches summary fields for hits that have already been
//! selected. Both are short-lived and discarded once used.
//!
//! The [`InvokerFactory`] trait is the seam between the dispatcher and the
//! transport: production code uses [`RpcInvokerFactory`], tests plug in mocks.

mod coverage_error;
mod factory;
mod interleaved;
mod rpc;
mod teardown;

pub use coverage_error::CoverageErrorInvoker;
pub use factory::InvokerFactory;
pub use interleaved::{merge_results, InterleavedSearchInvoker};
pub use rpc::{RpcFillInvoker, RpcInvokerFactory, RpcSearchInvoker};
pub use teardown::Teardown;

use async_trait::async_trait;
use dispatch_common::protocol::{Query, Result, SearchResult};

/// Runs one query attempt and produces the merged, windowed result.
#[async_trait]
pub trait SearchInvoker: Send {
    async fn search(&mut self, query: &Query) -> Result<SearchResult>;

    /// Distribution keys of the nodes this invoker will query.
    fn node_keys(&self) -> Vec<u32>;

    /// Registers the callback reporting `(success, elapsed)` when the attempt ends.
    ///
    /// It fires exactly once: after `search` returns, or as a failure if the
    /// invoker is dropped first.
    fn set_teardown(&mut self, teardown: Teardown);
}

/// Queries a single node. Results are not windowed; the caller merges them.
#[async_trait]
pub trait NodeSearchInvoker: Send {
    fn node_key(&self) -> u32;

    async fn search(&mut self, query: &Query, hits: usize) -> Result<SearchResult>;
}

/// Fills summary fields into the hits of a result.
#[async_trait]
pub trait FillInvoker: Send {
    /// Per-node failures are recorded as errors on `result`, not returned.
    async fn fill(&mut self, query: &Query, result: &mut SearchResult) -> Result<()>;
}
