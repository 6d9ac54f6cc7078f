//! Service registry — heartbeat liveness for this instance, and a
//! diagnostics-only view of the rest of the fleet.
//!
//! Liveness is nothing but a TTL key per instance. An instance that stops
//! refreshing its key is dead once the key expires; disconnect
//! announcements are advisory and never trusted for routing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::envelope::{Envelope, EnvelopeKind};
use super::error::BusError;
use super::{heartbeat_key, GLOBAL_CHANNEL, HEARTBEAT_PREFIX, KEY_DELIMITER};
use crate::store::{scan_all, KeyValueBus, SetMode, StoreError};

/// SCAN page size used when listing heartbeat keys.
const SCAN_COUNT: usize = 100;

/// A single metric value: a number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(serde_json::Number),
    Text(String),
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Number(value.into())
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Number(value.into())
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(MetricValue::Number)
            .unwrap_or_else(|| MetricValue::Text(value.to_string()))
    }
}

/// Flat metric snapshot.
pub type Metrics = BTreeMap<String, MetricValue>;

/// Zero-argument callback returning the latest metric snapshot.
pub type MetricProvider = Arc<dyn Fn() -> Metrics + Send + Sync>;

/// Liveness record stored under `service::<service>::<instance>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    pub service_name: String,
    pub instance_id: String,
    pub uptime_millis: u64,
    #[serde(default)]
    pub metrics: Metrics,
}

/// One live instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
}

impl ServiceInstance {
    /// Parse a heartbeat key back into its service and instance parts.
    pub fn from_key(key: &str) -> Option<Self> {
        let rest = key
            .strip_prefix(HEARTBEAT_PREFIX)?
            .strip_prefix(KEY_DELIMITER)?;
        let (service_name, instance_id) = rest.rsplit_once(KEY_DELIMITER)?;
        if service_name.is_empty() || instance_id.is_empty() {
            return None;
        }
        Some(Self {
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
        })
    }
}

/// Tracks this instance's heartbeat and observes fleet announcements.
pub struct ServiceRegistry<S> {
    store: Arc<S>,
    service_name: String,
    instance_id: String,
    started_at: Instant,
    interval: Duration,
    ttl: Duration,
    providers: RwLock<Vec<MetricProvider>>,
    connects_seen: AtomicU64,
    disconnects_seen: AtomicU64,
}

impl<S: KeyValueBus + 'static> ServiceRegistry<S> {
    /// Create a registry for one instance of `service_name`.
    pub fn new(
        store: Arc<S>,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        interval: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            started_at: Instant::now(),
            interval,
            ttl,
            providers: RwLock::new(Vec::new()),
            connects_seen: AtomicU64::new(0),
            disconnects_seen: AtomicU64::new(0),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Register a metric provider. Takes effect from the next heartbeat,
    /// so it can be called before or after the heartbeat is started.
    pub fn use_metric_provider<F>(&self, provider: F)
    where
        F: Fn() -> Metrics + Send + Sync + 'static,
    {
        match self.providers.write() {
            Ok(mut providers) => providers.push(Arc::new(provider)),
            Err(e) => warn!(error = %e, "metric provider list poisoned"),
        }
    }

    /// Merge every provider's snapshot; later providers win on key collisions.
    pub fn collect_metrics(&self) -> Metrics {
        // Clone the list so a slow provider does not hold the lock.
        let providers: Vec<MetricProvider> = self
            .providers
            .read()
            .map(|p| p.clone())
            .unwrap_or_default();
        let mut merged = Metrics::new();
        for provider in providers {
            merged.extend(provider());
        }
        merged
    }

    /// Write one heartbeat record with the configured TTL.
    pub fn beat(&self) -> Result<HeartbeatRecord, BusError> {
        let record = HeartbeatRecord {
            service_name: self.service_name.clone(),
            instance_id: self.instance_id.clone(),
            uptime_millis: self.started_at.elapsed().as_millis() as u64,
            metrics: self.collect_metrics(),
        };
        let value = serde_json::to_string(&record)?;
        self.store.set(
            &heartbeat_key(&self.service_name, &self.instance_id),
            &value,
            Some(self.ttl),
            SetMode::Always,
        )?;
        Ok(record)
    }

    /// Start the heartbeat loop: one beat immediately, then one per interval.
    pub fn start_heartbeat(self: &Arc<Self>) -> HeartbeatHandle {
        let (stop_tx, stop_rx) = channel();
        let registry = Arc::clone(self);

        let handle = thread::spawn(move || {
            let mut beats = 0;
            loop {
                match registry.beat() {
                    Ok(_) => beats += 1,
                    Err(e) => warn!(
                        service = %registry.service_name,
                        instance = %registry.instance_id,
                        error = %e,
                        "heartbeat write failed"
                    ),
                }
                match stop_rx.recv_timeout(registry.interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            beats
        });

        HeartbeatHandle {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Publish a `ServiceConnected` announcement on the global channel.
    pub fn announce_connect(&self) -> Result<(), BusError> {
        self.announce(EnvelopeKind::ServiceConnected)
    }

    /// Publish a `ServiceDisconnected` announcement on the global channel.
    pub fn announce_disconnect(&self) -> Result<(), BusError> {
        self.announce(EnvelopeKind::ServiceDisconnected)
    }

    fn announce(&self, kind: EnvelopeKind) -> Result<(), BusError> {
        let envelope = Envelope::new(&self.instance_id, kind).to_service(&self.service_name);
        self.store.publish(GLOBAL_CHANNEL, &envelope.encode()?)?;
        info!(
            service = %self.service_name,
            instance = %self.instance_id,
            ?kind,
            "announced"
        );
        Ok(())
    }

    /// Record a control envelope seen on the global channel.
    ///
    /// Announcements are advisory: nothing here changes routing, and no
    /// instance depends on another being up.
    pub fn observe(&self, envelope: &Envelope) {
        match envelope.kind {
            EnvelopeKind::ServiceConnected => {
                self.connects_seen.fetch_add(1, Ordering::Relaxed);
            }
            EnvelopeKind::ServiceDisconnected => {
                self.disconnects_seen.fetch_add(1, Ordering::Relaxed);
            }
            _ => return,
        }
        debug!(
            sender = %envelope.sender_id,
            service = envelope.target_service.as_deref().unwrap_or("?"),
            kind = ?envelope.kind,
            "fleet announcement"
        );
    }

    /// Count of (connect, disconnect) announcements observed.
    pub fn announcements_seen(&self) -> (u64, u64) {
        (
            self.connects_seen.load(Ordering::Relaxed),
            self.disconnects_seen.load(Ordering::Relaxed),
        )
    }

    /// Every instance whose heartbeat key is still within its TTL.
    ///
    /// Diagnostics only; routing never consults this.
    pub fn list_live_services(&self) -> Result<BTreeSet<ServiceInstance>, StoreError> {
        let pattern = format!("{HEARTBEAT_PREFIX}{KEY_DELIMITER}*");
        Ok(scan_all(self.store.as_ref(), &pattern, SCAN_COUNT)?
            .iter()
            .filter_map(|key| ServiceInstance::from_key(key))
            .collect())
    }

    /// Read and decode every live heartbeat record.
    pub fn live_records(&self) -> Result<Vec<HeartbeatRecord>, StoreError> {
        let mut records = Vec::new();
        for instance in self.list_live_services()? {
            let key = heartbeat_key(&instance.service_name, &instance.instance_id);
            // The key may expire between SCAN and GET.
            let Some(raw) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_str(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, error = %e, "unreadable heartbeat record"),
            }
        }
        Ok(records)
    }
}

/// Handle to a running heartbeat loop. Drop or call `stop()` to end it.
pub struct HeartbeatHandle {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<u64>>,
}

impl HeartbeatHandle {
    /// Stop the loop and wait for it. Returns the number of successful beats.
    pub fn stop(mut self) -> u64 {
        let _ = self.stop_tx.send(());
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
