//! Shared fixtures: fast bus options, instance startup, and a store wrapper
//! that counts lost claims per message id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use netjam_rust::bus::{Bus, BusHandle, BusOptions};
use netjam_rust::rpc::{ProviderDescriptor, RpcDispatcher};
use netjam_rust::store::{InMemoryStore, KeyValueBus, ScanPage, SetMode, StoreError, Subscription};

/// Options tuned so tests finish quickly.
pub fn fast_options() -> BusOptions {
    BusOptions {
        workers: 2,
        queue_capacity: 64,
        poll_interval: Duration::from_millis(10),
        claim_ttl: Duration::from_secs(5),
        call_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_ttl: Duration::from_millis(150),
    }
}

/// Bind `descriptors` and start one instance.
pub fn start_instance<S: KeyValueBus + 'static>(
    store: &Arc<S>,
    service: &str,
    instance: &str,
    descriptors: Vec<ProviderDescriptor>,
) -> (Arc<Bus<S>>, BusHandle<S>) {
    start_with_options(store, service, instance, descriptors, fast_options())
}

/// Like [`start_instance`], with explicit bus options.
pub fn start_with_options<S: KeyValueBus + 'static>(
    store: &Arc<S>,
    service: &str,
    instance: &str,
    descriptors: Vec<ProviderDescriptor>,
    options: BusOptions,
) -> (Arc<Bus<S>>, BusHandle<S>) {
    let dispatcher = Arc::new(RpcDispatcher::bind(&descriptors).unwrap());
    let bus = Arc::new(Bus::with_instance_id(
        Arc::clone(store),
        service,
        instance,
        dispatcher,
        options,
    ));
    let handle = bus.start().unwrap();
    (bus, handle)
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// In-memory store that records every conditional set that found the key taken.
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: InMemoryStore,
    lost: Arc<Mutex<HashMap<String, usize>>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// How many claim attempts on `key` lost.
    pub fn lost_for(&self, key: &str) -> usize {
        self.lost.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

impl KeyValueBus for CountingStore {
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        mode: SetMode,
    ) -> Result<bool, StoreError> {
        let written = self.inner.set(key, value, ttl, mode)?;
        if !written {
            *self.lost.lock().unwrap().entry(key.to_string()).or_default() += 1;
        }
        Ok(written)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.del(key)
    }

    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError> {
        self.inner.scan(cursor, pattern, count)
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, StoreError> {
        self.inner.publish(channel, payload)
    }

    fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>, StoreError> {
        self.inner.subscribe(channels)
    }
}
