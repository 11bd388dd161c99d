use thiserror::Error;

use super::result::{ErrorCode, ErrorMessage};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid search path: {0}")]
    InvalidSearchPath(String),

    #[error("No suitable groups to dispatch query. Rejected: {rejected:?}")]
    NoSuitableGroups { rejected: Vec<u32> },

    #[error("Could not dispatch directly to {0}")]
    LocalDispatchFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dispatcher has been shut down")]
    ShutDown,
}

impl DispatchError {
    /// True for errors caused by the request itself. These are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self, DispatchError::InvalidSearchPath(_))
    }

    /// True for transient per-node failures that a different group may not hit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout(_)
                | DispatchError::Transport(_)
                | DispatchError::NodeUnavailable(_)
                | DispatchError::Io(_)
        )
    }

    /// Converts the error into the message attached to a query result.
    pub fn to_error_message(&self) -> ErrorMessage {
        let code = match self {
            DispatchError::InvalidSearchPath(_) => ErrorCode::IllegalQuery,
            DispatchError::Timeout(_) => ErrorCode::Timeout,
            DispatchError::Transport(_) | DispatchError::Io(_) | DispatchError::InvalidResponse(_) => {
                ErrorCode::BackendCommunicationError
            }
            DispatchError::NodeUnavailable(_) | DispatchError::NoSuitableGroups { .. } => {
                ErrorCode::NoBackendsInService
            }
            _ => ErrorCode::InternalServerError,
        };
        ErrorMessage::new(code, self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
