//! In-memory key-value bus for testing and single-process fleets.
//!
//! Only the most recent [`PUBLISH_LOG_CAPACITY`] publishes are kept for
//! inspection, so a long-running process does not grow without bound.
//!
//! This module provides a thread-safe store that implements `KeyValueBus`,
//! useful for:
//! - Unit and integration testing without a Redis server
//! - Running several "instances" of a service inside one process
//! - Development and prototyping

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::{glob_match, ChannelMessage, KeyValueBus, ScanPage, SetMode, StoreError, Subscription};

/// Default number of recent publishes kept by [`InMemoryStore::published`].
pub const PUBLISH_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory key-value bus.
///
/// Features:
/// - Thread-safe (clones share the same keyspace and channels)
/// - Key expiry evaluated lazily on access
/// - Pub/sub fan-out: every live subscriber of a channel gets every message
/// - Bounded log of recent publishes for test assertions
/// - Scan cursors that stay valid while keys come and go
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use netjam_rust::store::{InMemoryStore, KeyValueBus, SetMode};
///
/// let store = InMemoryStore::new();
/// let mut sub = store.subscribe(&["news"]).unwrap();
///
/// assert!(store.set("claim-1", "me", None, SetMode::IfNotExists).unwrap());
/// assert!(!store.set("claim-1", "you", None, SetMode::IfNotExists).unwrap());
///
/// store.publish("news", b"hello").unwrap();
/// let msg = sub.next_message(Duration::from_millis(50)).unwrap().unwrap();
/// assert_eq!(msg.payload, b"hello");
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    channels: Arc<Mutex<HashMap<String, Vec<Sender<ChannelMessage>>>>>,
    published: Arc<Mutex<VecDeque<ChannelMessage>>>,
    log_capacity: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_publish_log(PUBLISH_LOG_CAPACITY)
    }
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that remembers the last `capacity` publishes.
    /// `0` turns the log off.
    pub fn with_publish_log(capacity: usize) -> Self {
        Self {
            entries: Arc::default(),
            channels: Arc::default(),
            published: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            log_capacity: capacity,
        }
    }

    /// Get the logged publishes, oldest first, across all channels.
    pub fn published(&self) -> Vec<ChannelMessage> {
        self.published
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the logged publishes on one channel, in order.
    pub fn published_on(&self, channel: &str) -> Vec<ChannelMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.channel == channel)
            .collect()
    }

    /// Number of live subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .map(|channels| channels.get(channel).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Remaining time-to-live of a key, `None` if absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Drop all keys, channels and the publish log (useful for test cleanup).
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
    }
}

impl KeyValueBus for InMemoryStore {
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        mode: SetMode,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write()?;

        if mode == SetMode::IfNotExists && entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read()?;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    fn del(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write()?;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    /// Keys are walked in order of a fixed hash, and the cursor is the hash
    /// to resume from. Adding or removing other keys never moves a key across
    /// the cursor, so a key present for the whole scan is returned exactly once.
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write()?;
        entries.retain(|_, e| e.is_live(now));

        let mut remaining: Vec<(u64, &String)> = entries
            .keys()
            .map(|key| (key_slot(key), key))
            .filter(|(slot, _)| *slot >= cursor)
            .collect();
        remaining.sort();

        // A page never splits keys that share a slot.
        let mut end = count.max(1).min(remaining.len());
        while end < remaining.len() && remaining[end].0 == remaining[end - 1].0 {
            end += 1;
        }

        let next = match remaining.get(end) {
            Some(_) => remaining[end - 1].0.checked_add(1).unwrap_or(0),
            None => 0,
        };
        let keys = remaining[..end]
            .iter()
            .filter(|(_, key)| glob_match(pattern, key))
            .map(|(_, key)| (*key).clone())
            .collect();
        Ok(ScanPage { cursor: next, keys })
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, StoreError> {
        let message = ChannelMessage {
            channel: channel.to_string(),
            payload: payload.to_vec(),
        };
        if self.log_capacity > 0 {
            let mut log = self.published.lock()?;
            if log.len() == self.log_capacity {
                log.pop_front();
            }
            log.push_back(message.clone());
        }

        let mut channels = self.channels.lock()?;
        let Some(senders) = channels.get_mut(channel) else {
            return Ok(0);
        };
        // Dropped subscriptions show up as closed senders here.
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(senders.len())
    }

    fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>, StoreError> {
        let (tx, rx) = mpsc::channel();
        let mut registry = self.channels.lock()?;
        for channel in channels {
            registry
                .entry((*channel).to_string())
                .or_default()
                .push(tx.clone());
        }
        Ok(Box::new(InMemorySubscription { rx }))
    }
}

fn key_slot(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Subscription handle returned by [`InMemoryStore::subscribe`].
pub struct InMemorySubscription {
    rx: Receiver<ChannelMessage>,
}

impl Subscription for InMemorySubscription {
    fn next_message(&mut self, timeout: Duration) -> Result<Option<ChannelMessage>, StoreError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Closed),
        }
    }
}
