//! Search Dispatch Common Types
//!
//! This crate provides the protocol definitions shared by every component of the
//! search dispatcher: the query and result model handed between the dispatcher and
//! its callers, the JSON-RPC envelope spoken to search nodes, and the error taxonomy.
//!
//! # Overview
//!
//! - **Query model**: [`Query`] carries everything the dispatcher needs to route a
//!   request (hit window, timeout, optional search path, trace level).
//! - **Result model**: [`SearchResult`], [`Hit`], [`Coverage`] and [`ErrorMessage`]
//!   describe what came back and how much of the corpus it covers.
//! - **Wire messages**: the ping, search and docsum payloads exchanged with a
//!   search node over JSON-RPC 2.0 (see [`protocol::wire`]).
//! - **Errors**: [`DispatchError`] separates client errors, transient per-node
//!   failures and cluster-wide exhaustion.
//!
//! # Example
//!
//! ```
//! use dispatch_common::{Query, SearchResult, Hit};
//! use serde_json::json;
//!
//! let query = Query::new(json!({"term": "rust"})).with_hits(10);
//!
//! let mut result = SearchResult::new();
//! result.hits.push(Hit::new("doc:1", 0.9, 0));
//! assert_eq!(result.hits.len(), 1);
//! assert_eq!(query.hits, 10);
//! ```

pub mod protocol;

pub use protocol::*;
