//! Error types for the client.

use thiserror::Error;

use crate::options::Consistency;

/// The main error type for client operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The client configuration cannot produce a usable cluster definition.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The lazy connect of a handle failed. The handle stays unconnected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A query failed on the backing store.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// The request could not be built. Raised before any I/O.
    #[error("Programming error: {0}")]
    Programming(String),
}

/// Write kinds reported by a write timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    BatchLog,
    Cas,
    Other,
}

/// Failures of a single query, as reported by the backing store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Read timeout at {consistency}: {received}/{required} replicas responded (data present: {data_present})")]
    ReadTimeout {
        consistency: Consistency,
        received: u32,
        required: u32,
        data_present: bool,
    },

    #[error("Write timeout at {consistency} ({write_type:?}): {received}/{required} replicas acknowledged")]
    WriteTimeout {
        consistency: Consistency,
        received: u32,
        required: u32,
        write_type: WriteType,
    },

    #[error("Not enough replicas available at {consistency}: {alive}/{required} alive")]
    Unavailable {
        consistency: Consistency,
        required: u32,
        alive: u32,
    },

    /// Syntax errors, unknown tables, bad bind values.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The paging token does not belong to this statement.
    #[error("Invalid paging state: {0}")]
    InvalidPagingState(String),

    #[error("Server error: {0}")]
    Server(String),

    /// Client-side request timeout.
    #[error("Request timed out")]
    Timeout,

    /// The driver task ended without producing an outcome.
    #[error("Request aborted: {0}")]
    Aborted(String),
}

impl ClientError {
    /// Create a programming error.
    pub fn programming(message: impl Into<String>) -> Self {
        Self::Programming(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// The execution failure, if this is one.
    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            Self::Execution(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Programming(e.to_string())
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
