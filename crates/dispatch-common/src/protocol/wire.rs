//! Search Node Wire Messages
//!
//! Payloads carried in the `params` / `result` of the JSON-RPC envelope when the
//! dispatcher talks to a search node. Each node serves three methods:
//!
//! - [`METHOD_PING`]: liveness plus the node's active document count
//! - [`METHOD_SEARCH`]: run the query and return the top hits
//! - [`METHOD_DOCSUM`]: fetch summary fields for a set of hits

use serde::{Deserialize, Serialize};

use super::result::{Coverage, DegradedReason, Hit};

pub const METHOD_PING: &str = "search.ping";
pub const METHOD_SEARCH: &str = "search.query";
pub const METHOD_DOCSUM: &str = "search.docsum";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PingRequest {}

/// Answer to a ping.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Pong {
    pub active_docs: u64,
    #[serde(default)]
    pub target_active_docs: Option<u64>,
    /// The node refuses feed because it is out of resources or out of sync
    #[serde(default)]
    pub blocking_writes: bool,
}

impl Pong {
    pub fn new(active_docs: u64) -> Self {
        Self {
            active_docs,
            target_active_docs: None,
            blocking_writes: false,
        }
    }

    pub fn blocking_writes(mut self) -> Self {
        self.blocking_writes = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSearchRequest {
    pub query_id: u64,
    pub body: serde_json::Value,
    /// Hits wanted from this node, counted from the first hit
    pub hits: usize,
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeHit {
    pub id: String,
    pub relevance: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeCoverage {
    pub docs: u64,
    pub active: u64,
    #[serde(default)]
    pub target_active: Option<u64>,
    #[serde(default)]
    pub degraded_match_phase: bool,
    #[serde(default)]
    pub degraded_timeout: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeSearchResponse {
    pub hits: Vec<NodeHit>,
    pub total_hit_count: u64,
    pub coverage: NodeCoverage,
}

impl NodeSearchResponse {
    /// Stamps the hits with the answering node's distribution key.
    pub fn into_hits(self, node: u32) -> (Vec<Hit>, u64, Coverage) {
        let hits = self
            .hits
            .into_iter()
            .map(|h| Hit::new(h.id, h.relevance, node))
            .collect();
        let coverage = Coverage {
            docs: self.coverage.docs,
            active: self.coverage.active,
            target_active: self.coverage.target_active.unwrap_or(self.coverage.active),
            nodes: 1,
            nodes_tried: 1,
            degraded: DegradedReason {
                timeout: self.coverage.degraded_timeout,
                match_phase: self.coverage.degraded_match_phase,
                non_ideal_state: false,
            },
        };
        (hits, self.total_hit_count, coverage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocsumRequest {
    pub summary: Option<String>,
    pub ids: Vec<String>,
    /// Present when the summary depends on the query (e.g. dynamic snippets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Docsum {
    pub id: String,
    pub fields: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocsumResponse {
    pub docsums: Vec<Docsum>,
}
