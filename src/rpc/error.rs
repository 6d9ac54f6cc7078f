//! Error types for RPC handlers and binding.

use std::error::Error;

use super::dispatcher::Table;

/// Error type for handler and middleware execution.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A positional argument could not be decoded into the requested type.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// A positional argument was absent or of the wrong kind.
    #[error("missing argument {index}: {reason}")]
    MissingArgument { index: usize, reason: String },
    /// Business logic rejected the event (validation, invariant violation).
    #[error("rejected: {0}")]
    Rejected(String),
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Missing or invalid authentication / authorization.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Other error.
    #[error("handler error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl HandlerError {
    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::DecodeFailed(_) => 400,
            HandlerError::MissingArgument { .. } => 400,
            HandlerError::Rejected(_) => 422,
            HandlerError::NotFound(_) => 404,
            HandlerError::Unauthorized(_) => 401,
            HandlerError::Other(_) => 500,
        }
    }
}

/// Configuration error raised while building the dispatch tables.
///
/// These are fatal: a node whose providers fail to bind must not start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// Two methods resolve to the same event in the same table.
    #[error(
        "cannot bind more than one {table} handler for the event: namespace \"{namespace}\", event \"{event}\""
    )]
    DuplicateBinding {
        namespace: String,
        event: String,
        table: Table,
    },
    /// An injected parameter points past the method's declared arity.
    #[error(
        "injected parameter {index} of {namespace}::{method} is out of range (arity {arity})"
    )]
    InjectionOutOfRange {
        namespace: String,
        method: String,
        index: usize,
        arity: usize,
    },
}
