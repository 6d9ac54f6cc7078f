//! Handshake — metadata a transport captured when the connection opened
//! (request headers, query parameters, bus envelope fields).

use std::collections::HashMap;

/// Key holding the publishing instance for bus-originated events.
pub const SENDER_KEY: &str = "x-netjam-sender";
/// Key holding the envelope id for bus-originated events.
pub const MESSAGE_ID_KEY: &str = "x-netjam-message-id";
/// Key holding the correlation id for bus calls.
pub const CORRELATION_KEY: &str = "x-netjam-correlation-id";

/// Connection metadata as string key/value pairs.
///
/// Keys are stored as given; HTTP transports lowercase header names before
/// inserting them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    variables: HashMap<String, String>,
}

impl Handshake {
    /// Create an empty handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handshake from a map of variables.
    pub fn from_map(variables: HashMap<String, String>) -> Self {
        Self { variables }
    }

    /// Get a variable by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(|v| v.as_str())
    }

    /// Set a variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Check if a variable exists.
    pub fn has(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    /// Publishing instance, for bus-originated events.
    pub fn sender(&self) -> Option<&str> {
        self.get(SENDER_KEY)
    }

    /// Get all variables.
    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }
}
