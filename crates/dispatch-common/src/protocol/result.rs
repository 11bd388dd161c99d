//! Result Model
//!
//! A [`SearchResult`] is what one query attempt produces after the per-node
//! responses have been merged: the ranked hit window, the total hit count, how much
//! of the corpus the answer covers, and any errors absorbed along the way.

use serde::{Deserialize, Serialize};

/// Result-level error codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    IllegalQuery,
    InternalServerError,
    Timeout,
    BackendCommunicationError,
    NoBackendsInService,
}

/// An error carried inside a result rather than failing the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn illegal_query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IllegalQuery, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn backend_communication(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BackendCommunicationError, message)
    }
}

/// Why a result covers less than it should.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DegradedReason {
    /// One or more nodes did not answer before the deadline
    pub timeout: bool,
    /// A node limited its own matching to stay within budget
    pub match_phase: bool,
    /// Some nodes of the group were unreachable and were left out
    pub non_ideal_state: bool,
}

impl DegradedReason {
    pub fn is_degraded(&self) -> bool {
        self.timeout || self.match_phase || self.non_ideal_state
    }

    pub fn merge(&mut self, other: &DegradedReason) {
        self.timeout |= other.timeout;
        self.match_phase |= other.match_phase;
        self.non_ideal_state |= other.non_ideal_state;
    }
}

/// How much of the corpus an answer was computed over.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Coverage {
    /// Documents actually searched
    pub docs: u64,
    /// Documents active in the nodes that were asked
    pub active: u64,
    /// Documents that should be active once the nodes are in sync
    pub target_active: u64,
    /// Nodes that answered
    pub nodes: u32,
    /// Nodes that were asked
    pub nodes_tried: u32,
    pub degraded: DegradedReason,
}

impl Coverage {
    pub fn new(docs: u64, active: u64, nodes: u32, nodes_tried: u32) -> Self {
        Self {
            docs,
            active,
            target_active: active,
            nodes,
            nodes_tried,
            degraded: DegradedReason::default(),
        }
    }

    /// Coverage of a node that was tried and never answered.
    pub fn missing_nodes(count: u32) -> Self {
        Self {
            nodes_tried: count,
            degraded: DegradedReason {
                non_ideal_state: true,
                ..DegradedReason::default()
            },
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: &Coverage) {
        self.docs += other.docs;
        self.active += other.active;
        self.target_active += other.target_active;
        self.nodes += other.nodes;
        self.nodes_tried += other.nodes_tried;
        self.degraded.merge(&other.degraded);
    }

    pub fn is_full(&self) -> bool {
        self.nodes == self.nodes_tried && self.docs >= self.active && !self.degraded.is_degraded()
    }

    /// Percentage of active documents covered, 100 when nothing is active.
    pub fn percentage(&self) -> u32 {
        if self.active == 0 {
            return if self.nodes == self.nodes_tried { 100 } else { 0 };
        }
        ((self.docs.min(self.active) * 100) / self.active) as u32
    }
}

/// A single hit returned by a search node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    /// Global document id
    pub id: String,
    pub relevance: f64,
    /// Distribution key of the node that produced the hit
    pub node: u32,
    /// Summary fields, present once the hit has been filled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

impl Hit {
    pub fn new(id: impl Into<String>, relevance: f64, node: u32) -> Self {
        Self {
            id: id.into(),
            relevance,
            node,
            fields: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.fields.is_some()
    }
}

/// The merged outcome of one query attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub hits: Vec<Hit>,
    pub total_hit_count: u64,
    pub coverage: Coverage,
    #[serde(default)]
    pub errors: Vec<ErrorMessage>,
}

impl SearchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_error(error: ErrorMessage) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ErrorMessage) {
        self.errors.push(error);
    }
}
