//! Query Model
//!
//! The dispatcher never looks inside the query body: parsing and ranking happen
//! elsewhere. It only needs the hit window, the timeout, an optional search path
//! override and somewhere to leave trace messages.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

pub type QueryId = u64;

static QUERY_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

const DEFAULT_HITS: usize = 10;
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// A search query on its way to the backend nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    pub id: QueryId,
    /// Opaque, already parsed query tree forwarded verbatim to the nodes
    pub body: serde_json::Value,
    /// Number of hits to return
    pub hits: usize,
    /// Index of the first hit to return
    pub offset: usize,
    pub timeout_ms: u64,
    /// Explicit node selection overriding load balancing (e.g. `"0,1/2"`)
    pub search_path: Option<String>,
    pub trace_level: u32,
    /// Only estimate the total hit count; no hits are returned
    pub estimate: bool,
    pub ranking: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub trace: Vec<String>,
}

impl Query {
    pub fn new(body: serde_json::Value) -> Self {
        Query {
            id: generate_query_id(),
            body,
            hits: DEFAULT_HITS,
            offset: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            search_path: None,
            trace_level: 0,
            estimate: false,
            ranking: None,
            summary: None,
            trace: Vec::new(),
        }
    }

    pub fn with_hits(mut self, hits: usize) -> Self {
        self.hits = hits;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_search_path(mut self, search_path: impl Into<String>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn with_trace_level(mut self, trace_level: u32) -> Self {
        self.trace_level = trace_level;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Hits each node must return for the merged window to be complete.
    pub fn hits_to_fetch(&self) -> usize {
        self.offset.saturating_add(self.hits)
    }

    /// Records a trace message if the query traces at `level` or above.
    pub fn trace(&mut self, level: u32, message: impl Into<String>) {
        if self.trace_level >= level {
            self.trace.push(message.into());
        }
    }
}

fn generate_query_id() -> QueryId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = QUERY_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // Upper 32 bits from the clock, lower 32 bits from the counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
