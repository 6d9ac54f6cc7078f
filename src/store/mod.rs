//! Key-value bus — the shared store and broadcast medium the fleet talks through.
//!
//! The bus layer only ever needs six primitives: SET with expiry, GET, DEL,
//! prefix SCAN, PUBLISH and SUBSCRIBE. Anything that offers those (Redis,
//! KeyDB, the in-memory store below) can carry a fleet.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Bus / ServiceRegistry / Claims              │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     KeyValueBus trait                       │
//! │  set / get / del / scan           publish / subscribe       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌─────────────────┐                ┌─────────────────────┐
//! │  InMemoryStore  │                │     RedisStore      │
//! │   (included)    │                │  (feature "redis")  │
//! └─────────────────┘                └─────────────────────┘
//! ```
//!
//! Delivery is at-most-once per subscriber and nothing is persisted; the
//! claim protocol in `bus::claim` is what turns broadcast into
//! one-instance-acts semantics.

mod error;
mod in_memory;
#[cfg(feature = "redis")]
mod redis;

use std::time::Duration;

pub use error::StoreError;
pub use in_memory::{InMemoryStore, InMemorySubscription};
#[cfg(feature = "redis")]
pub use self::redis::{RedisStore, RedisSubscription};

/// Write mode for [`KeyValueBus::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    /// Overwrite whatever is stored under the key.
    #[default]
    Always,
    /// Only write when the key does not exist (`SET ... NX`).
    IfNotExists,
}

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next call. `0` means the scan is complete.
    pub cursor: u64,
    /// Keys matched on this page.
    pub keys: Vec<String>,
}

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Trait for the shared store + pub/sub medium.
///
/// Implementations must be safe to share across threads; the bus holds one
/// behind an `Arc` and calls it from heartbeat, reader and worker threads.
pub trait KeyValueBus: Send + Sync {
    /// Store `value` under `key`, optionally expiring after `ttl`.
    ///
    /// Returns `Ok(true)` when the value was written, `Ok(false)` when
    /// `SetMode::IfNotExists` found the key already present.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        mode: SetMode,
    ) -> Result<bool, StoreError>;

    /// Read the value stored under `key`, if any (expired keys read as absent).
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete `key`. Returns `true` when something was removed.
    fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Iterate keys matching a glob `pattern` (`*` and `?` wildcards).
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError>;

    /// Broadcast `payload` on `channel`. Returns the number of receivers.
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, StoreError>;

    /// Join one or more channels. Dropping the subscription leaves them.
    fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>, StoreError>;
}

/// A live subscription to one or more channels.
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing received.
    fn next_message(&mut self, timeout: Duration) -> Result<Option<ChannelMessage>, StoreError>;
}

/// Collect every key matching `pattern` by walking the scan cursor to the end.
pub fn scan_all<S: KeyValueBus + ?Sized>(
    store: &S,
    pattern: &str,
    count: usize,
) -> Result<Vec<String>, StoreError> {
    let mut keys = Vec::new();
    let mut cursor = 0;
    loop {
        let page = store.scan(cursor, pattern, count)?;
        keys.extend(page.keys);
        if page.cursor == 0 {
            return Ok(keys);
        }
        cursor = page.cursor;
    }
}

/// Glob match with `*` (any run) and `?` (any single char), as used by SCAN MATCH.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
