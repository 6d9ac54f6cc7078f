/// Error type for key-value bus operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the store.
    #[error("store connection failed: {0}")]
    Connection(String),
    /// The store rejected or failed a command.
    #[error("store command failed: {0}")]
    Command(String),
    /// A lock guarding in-process state was poisoned.
    #[error("store state poisoned: {0}")]
    Poisoned(String),
    /// The subscription (or the store behind it) has gone away.
    #[error("subscription closed")]
    Closed,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned(err.to_string())
    }
}
