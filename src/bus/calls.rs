//! Outstanding bus calls, keyed by correlation id.
//!
//! A caller registers a correlation id, publishes its `Call`, and waits on the
//! returned [`PendingCall`]. When the matching `CallReturn` comes in, the bus
//! resolves the entry and the caller wakes. A caller that times out purges
//! its entry, so a late reply finds nothing and is discarded.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use super::envelope::CallReply;
use super::error::CallError;

struct PendingEntry {
    reply_tx: Sender<CallReply>,
    deadline: Instant,
}

/// Correlation table for calls this instance is waiting on.
#[derive(Default)]
pub struct PendingCalls {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and get the handle to wait on.
    pub fn register(&self, correlation_id: impl Into<String>, timeout: Duration) -> PendingCall<'_> {
        let correlation_id = correlation_id.into();
        let (reply_tx, reply_rx) = channel();
        self.prune_expired();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                correlation_id.clone(),
                PendingEntry {
                    reply_tx,
                    deadline: Instant::now() + timeout,
                },
            );
        }
        PendingCall {
            table: self,
            correlation_id,
            reply_rx,
            timeout,
        }
    }

    /// Deliver a reply. Returns `false` when nobody is waiting for it
    /// (unknown, timed out, or already answered).
    pub fn resolve(&self, correlation_id: &str, reply: CallReply) -> bool {
        let entry = match self.entries.lock() {
            Ok(mut entries) => entries.remove(correlation_id),
            Err(e) => {
                warn!(error = %e, "call table poisoned");
                None
            }
        };
        match entry {
            Some(entry) if entry.deadline > Instant::now() => entry.reply_tx.send(reply).is_ok(),
            Some(_) => {
                debug!(correlation_id, "reply arrived after deadline, discarding");
                false
            }
            None => false,
        }
    }

    /// Drop entries past their deadline. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| e.deadline > now);
        before - entries.len()
    }

    /// Fail every outstanding call with [`CallError::Closed`].
    pub fn close(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Number of calls still waiting.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, correlation_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(correlation_id);
        }
    }
}

/// A registered call awaiting its reply. Dropping it purges the entry.
pub struct PendingCall<'a> {
    table: &'a PendingCalls,
    correlation_id: String,
    reply_rx: Receiver<CallReply>,
    timeout: Duration,
}

impl PendingCall<'_> {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Block until the reply arrives or the timeout elapses.
    pub fn wait(self) -> Result<Value, CallError> {
        match self.reply_rx.recv_timeout(self.timeout) {
            Ok(CallReply::Ok(value)) => Ok(value),
            Ok(CallReply::Err(message)) => Err(CallError::Remote(message)),
            Err(RecvTimeoutError::Timeout) => Err(CallError::Timeout {
                correlation_id: self.correlation_id.clone(),
                timeout: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(CallError::Closed),
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.correlation_id);
    }
}
