use dispatch_common::protocol::{Coverage, SearchResult};

/// Stands in for the nodes of a group that could not be invoked.
///
/// Contributes no hits, only coverage showing those nodes as tried but missing,
/// so the merged result reports itself as degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageErrorInvoker {
    missing: Vec<u32>,
}

impl CoverageErrorInvoker {
    pub fn new(missing: Vec<u32>) -> Self {
        Self { missing }
    }

    pub fn missing_nodes(&self) -> &[u32] {
        &self.missing
    }

    pub fn result(&self) -> SearchResult {
        SearchResult {
            coverage: Coverage::missing_nodes(self.missing.len() as u32),
            ..SearchResult::default()
        }
    }
}
