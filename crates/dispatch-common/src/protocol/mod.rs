pub mod error;
pub mod jsonrpc;
pub mod query;
pub mod result;
pub mod wire;


pub use error::{DispatchError, Result};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use query::{Query, QueryId};
pub use result::{Coverage, DegradedReason, ErrorCode, ErrorMessage, Hit, SearchResult};
