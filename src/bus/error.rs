use std::time::Duration;

use crate::store::StoreError;

/// Error type for bus operations (publish, heartbeat, announcements).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The key-value bus failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An envelope or record could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error returned to the originator of a bus call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// No matching `CallReturn` arrived before the deadline.
    #[error("call {correlation_id} timed out after {timeout:?}")]
    Timeout {
        correlation_id: String,
        timeout: Duration,
    },
    /// The remote handler failed; carries its error message.
    #[error("remote handler failed: {0}")]
    Remote(String),
    /// The call could not be published.
    #[error("call publish failed: {0}")]
    Publish(#[from] BusError),
    /// The correlation table was torn down while waiting.
    #[error("call abandoned: bus shut down")]
    Closed,
}
