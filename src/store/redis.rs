//! Redis-backed key-value bus (requires the `redis` feature).
//!
//! Commands go through one shared connection guarded by a mutex. Each
//! subscription gets its own connection driven by a reader thread, because a
//! Redis connection in subscribe mode cannot issue regular commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use redis::{Client, Connection, RedisError};
use tracing::{debug, warn};

use super::{ChannelMessage, KeyValueBus, ScanPage, SetMode, StoreError, Subscription};

/// How often the subscription reader wakes up to check for shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Key-value bus on top of a Redis server.
///
/// ```ignore
/// use netjam_rust::store::RedisStore;
///
/// let store = RedisStore::open("redis://127.0.0.1:6379")?;
/// ```
pub struct RedisStore {
    client: Client,
    conn: Mutex<Connection>,
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = client.get_connection()?;
        Ok(Self {
            client,
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueBus for RedisStore {
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        mode: SetMode,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        if mode == SetMode::IfNotExists {
            cmd.arg("NX");
        }
        let mut conn = self.conn.lock()?;
        let reply: Option<String> = cmd.query(&mut *conn)?;
        Ok(reply.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.lock()?;
        Ok(redis::cmd("GET").arg(key).query(&mut *conn)?)
    }

    fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock()?;
        let removed: i64 = redis::cmd("DEL").arg(key).query(&mut *conn)?;
        Ok(removed > 0)
    }

    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError> {
        let mut conn = self.conn.lock()?;
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query(&mut *conn)?;
        Ok(ScanPage { cursor, keys })
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock()?;
        Ok(redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query(&mut *conn)?)
    }

    fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>, StoreError> {
        let mut conn = self.client.get_connection()?;
        let channels: Vec<String> = channels.iter().map(|c| (*c).to_string()).collect();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), StoreError>>();

        let reader_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut pubsub = conn.as_pubsub();
            let joined = channels
                .iter()
                .try_for_each(|ch| pubsub.subscribe(ch))
                .and_then(|()| pubsub.set_read_timeout(Some(READ_TIMEOUT)));
            if let Err(e) = joined {
                let _ = ready_tx.send(Err(e.into()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while !reader_stop.load(Ordering::Relaxed) {
                match pubsub.get_message() {
                    Ok(msg) => {
                        let message = ChannelMessage {
                            channel: msg.get_channel_name().to_string(),
                            payload: msg.get_payload_bytes().to_vec(),
                        };
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_timeout() => {}
                    Err(e) => {
                        warn!(error = %e, "redis subscription failed");
                        break;
                    }
                }
            }
            debug!(?channels, "redis subscription reader stopped");
        });

        ready_rx.recv().map_err(|_| StoreError::Closed)??;
        Ok(Box::new(RedisSubscription {
            rx,
            stop,
            handle: Some(handle),
        }))
    }
}

/// Subscription handle returned by [`RedisStore::subscribe`].
pub struct RedisSubscription {
    rx: Receiver<ChannelMessage>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription for RedisSubscription {
    fn next_message(&mut self, timeout: Duration) -> Result<Option<ChannelMessage>, StoreError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Closed),
        }
    }
}

impl Drop for RedisSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
