//! Bus — one instance's connection to the fleet.
//!
//! Publishing picks the channel from the envelope: control kinds, call
//! replies and unaddressed messages go to the global channel, everything
//! addressed to a service goes to that service's channel.
//!
//! Receiving runs two independent streams (global, own service). Each stream
//! has a reader thread feeding a bounded queue and a pool of worker threads
//! draining it, so messages are handled concurrently with no ordering
//! between distinct ids. The reader decodes, and resolves `CallReturn`s
//! itself: a handler blocked in [`Bus::call`] holds a worker, so its reply
//! must not wait behind it in the same queue.
//!
//! ```text
//!  subscription ──▶ reader ──▶ sync_channel(queue_capacity) ──▶ worker × N ──▶ handle_envelope
//!                     └── CallReturn ──▶ PendingCalls
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::calls::PendingCalls;
use super::claim::{ClaimCoordinator, ClaimStats};
use super::envelope::{CallReply, DecodeError, Envelope, EnvelopeKind};
use super::error::{BusError, CallError};
use super::registry::{HeartbeatHandle, MetricProvider, Metrics, ServiceRegistry};
use super::{service_channel, GLOBAL_CHANNEL};
use crate::rpc::{Connection, Dispatch, RpcDispatcher};
use crate::store::{KeyValueBus, StoreError, Subscription};

/// Tuning knobs for a [`Bus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusOptions {
    /// Worker threads per subscription stream.
    pub workers: usize,
    /// Bound on queued, not yet handled messages per stream.
    pub queue_capacity: usize,
    /// How long a reader blocks on its subscription before checking for stop.
    pub poll_interval: Duration,
    /// Safety expiry on claim keys.
    pub claim_ttl: Duration,
    /// Default deadline for [`Bus::call`].
    pub call_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_ttl: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            poll_interval: Duration::from_millis(100),
            claim_ttl: Duration::from_secs(60),
            call_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_ttl: Duration::from_secs(15),
        }
    }
}

/// Counters for inbound traffic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Raw messages taken off either subscription.
    pub received: u64,
    /// Messages that reached a handler, resolved a call, or were observed.
    pub handled: u64,
    /// Handler errors, handler panics, or store failures.
    pub failed: u64,
    /// Addressed messages another replica claimed first.
    pub skipped: u64,
    /// No binding, no waiting caller, or not addressed to us.
    pub unmatched: u64,
    /// Payloads that did not decode as an envelope.
    pub malformed: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    unmatched: AtomicU64,
    malformed: AtomicU64,
}

impl Counters {
    fn record(&self, handled: &Handled) {
        let counter = match handled {
            Handled::Observed | Handled::Dispatched | Handled::Resolved => &self.handled,
            Handled::Failed => &self.failed,
            Handled::Skipped => &self.skipped,
            Handled::Unmatched | Handled::Ignored => &self.unmatched,
            Handled::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BusStats {
        BusStats {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Fleet announcement recorded by the registry.
    Observed,
    /// A handler ran (and, for calls, a reply was published).
    Dispatched,
    /// A `CallReturn` woke a waiting caller.
    Resolved,
    /// Another replica held the claim.
    Skipped,
    /// Nothing bound for the event, or a reply nobody waits for.
    Unmatched,
    /// Addressed to another service or missing required fields.
    Ignored,
    /// The handler failed or panicked, or the store failed.
    Failed,
    /// Did not decode.
    Malformed,
}

/// The fleet operations handed to provider hooks.
pub trait Fleet: Send + Sync {
    fn service_name(&self) -> &str;

    fn instance_id(&self) -> &str;

    /// Fire-and-forget to one replica of `service`. Returns the envelope id.
    fn message(&self, service: &str, event: &str, payload: Value) -> Result<String, BusError>;

    /// Fire-and-forget to every instance of every service.
    fn broadcast(&self, event: &str, payload: Value) -> Result<String, BusError>;

    /// Call one replica of `service` and wait for its reply.
    ///
    /// `None` uses the bus's default timeout.
    fn call(
        &self,
        service: &str,
        event: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError>;

    /// Add a metric provider to this instance's heartbeat.
    fn use_metric_provider(&self, provider: MetricProvider);
}

/// One instance's connection to the fleet bus.
pub struct Bus<S> {
    store: Arc<S>,
    options: BusOptions,
    registry: Arc<ServiceRegistry<S>>,
    claims: ClaimCoordinator<S>,
    calls: PendingCalls,
    dispatcher: Arc<RpcDispatcher>,
    counters: Counters,
}

impl<S: KeyValueBus + 'static> Bus<S> {
    /// Create a bus for a new instance of `service_name` with a random instance id.
    pub fn new(
        store: Arc<S>,
        service_name: impl Into<String>,
        dispatcher: Arc<RpcDispatcher>,
        options: BusOptions,
    ) -> Self {
        Self::with_instance_id(
            store,
            service_name,
            uuid::Uuid::new_v4().to_string(),
            dispatcher,
            options,
        )
    }

    /// Create a bus with a caller-chosen instance id.
    pub fn with_instance_id(
        store: Arc<S>,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        dispatcher: Arc<RpcDispatcher>,
        options: BusOptions,
    ) -> Self {
        let service_name = service_name.into();
        let instance_id = instance_id.into();
        let registry = Arc::new(ServiceRegistry::new(
            Arc::clone(&store),
            service_name,
            instance_id.clone(),
            options.heartbeat_interval,
            options.heartbeat_ttl,
        ));
        let claims = ClaimCoordinator::new(Arc::clone(&store), instance_id, options.claim_ttl);
        Self {
            store,
            options,
            registry,
            claims,
            calls: PendingCalls::new(),
            dispatcher,
            counters: Counters::default(),
        }
    }

    pub fn service_name(&self) -> &str {
        self.registry.service_name()
    }

    pub fn instance_id(&self) -> &str {
        self.registry.instance_id()
    }

    pub fn options(&self) -> &BusOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry<S>> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<RpcDispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Snapshot of the inbound counters.
    pub fn stats(&self) -> BusStats {
        self.counters.snapshot()
    }

    pub fn claim_stats(&self) -> ClaimStats {
        self.claims.stats()
    }

    /// Calls this instance is still waiting on.
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Register a metric provider; see [`ServiceRegistry::use_metric_provider`].
    pub fn use_metric_provider<F>(&self, provider: F)
    where
        F: Fn() -> Metrics + Send + Sync + 'static,
    {
        self.registry.use_metric_provider(provider);
    }

    /// Publish an envelope on the channel its kind and target call for.
    pub fn publish_envelope(&self, envelope: &Envelope) -> Result<usize, BusError> {
        let channel = match (&envelope.kind, &envelope.target_service) {
            (kind, _) if kind.is_control() => GLOBAL_CHANNEL.to_string(),
            (EnvelopeKind::CallReturn, _) | (_, None) => GLOBAL_CHANNEL.to_string(),
            (_, Some(service)) => service_channel(service),
        };
        let receivers = self.store.publish(&channel, &envelope.encode()?)?;
        debug!(
            channel = %channel,
            message_id = %envelope.id,
            kind = ?envelope.kind,
            receivers,
            "published"
        );
        Ok(receivers)
    }

    /// Build and publish an envelope from this instance. Returns its id.
    ///
    /// Absent fields stay off the wire, so control kinds can be published
    /// with no event or payload.
    pub fn publish(
        &self,
        kind: EnvelopeKind,
        target_service: Option<&str>,
        event: Option<&str>,
        payload: Option<Value>,
    ) -> Result<String, BusError> {
        let mut envelope = Envelope::new(self.instance_id(), kind);
        if let Some(service) = target_service {
            envelope = envelope.to_service(service);
        }
        if let Some(event) = event {
            envelope = envelope.with_event(event);
        }
        if let Some(payload) = payload {
            envelope = envelope.with_payload(payload);
        }
        self.publish_envelope(&envelope)?;
        Ok(envelope.id)
    }

    /// Fire-and-forget to exactly one live replica of `service`.
    pub fn message(&self, service: &str, event: &str, payload: Value) -> Result<String, BusError> {
        self.publish(EnvelopeKind::Message, Some(service), Some(event), Some(payload))
    }

    /// Fire-and-forget to every instance; no claim is taken.
    pub fn broadcast(&self, event: &str, payload: Value) -> Result<String, BusError> {
        self.publish(EnvelopeKind::Message, None, Some(event), Some(payload))
    }

    /// Call one replica of `service` with the default timeout.
    pub fn call(&self, service: &str, event: &str, payload: Value) -> Result<Value, CallError> {
        self.call_with_timeout(service, event, payload, self.options.call_timeout)
    }

    /// Call one replica of `service` and block until its reply or `timeout`.
    pub fn call_with_timeout(
        &self,
        service: &str,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let pending = self.calls.register(&correlation_id, timeout);

        let envelope = Envelope::new(self.instance_id(), EnvelopeKind::Call)
            .to_service(service)
            .with_event(event)
            .with_payload(payload)
            .with_correlation(&correlation_id);
        self.publish_envelope(&envelope)?;

        debug!(correlation_id = %correlation_id, service, event, "call sent");
        let result = pending.wait();
        if let Err(CallError::Timeout { .. }) = &result {
            warn!(correlation_id = %correlation_id, service, event, ?timeout, "call timed out");
        }
        result
    }

    /// Decode and handle one raw message.
    pub fn handle_raw(&self, bytes: &[u8]) -> Handled {
        match Envelope::decode(bytes) {
            Ok(envelope) => self.receive(&envelope),
            Err(e) => self.reject(&e),
        }
    }

    /// Handle one inbound envelope and count it.
    fn receive(&self, envelope: &Envelope) -> Handled {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let handled = self.handle_envelope(envelope);
        self.counters.record(&handled);
        handled
    }

    fn reject(&self, e: &DecodeError) -> Handled {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        warn!(instance = %self.instance_id(), error = %e, "dropping malformed envelope");
        self.counters.record(&Handled::Malformed);
        Handled::Malformed
    }

    /// Handle one decoded envelope.
    pub fn handle_envelope(&self, envelope: &Envelope) -> Handled {
        match envelope.kind {
            EnvelopeKind::ServiceConnected | EnvelopeKind::ServiceDisconnected => {
                self.registry.observe(envelope);
                Handled::Observed
            }
            EnvelopeKind::CallReturn => self.handle_call_return(envelope),
            EnvelopeKind::Message => match envelope.target_service.as_deref() {
                None => self.handle_broadcast(envelope),
                Some(service) if service == self.service_name() => self.handle_message(envelope),
                Some(_) => Handled::Ignored,
            },
            EnvelopeKind::Call => match envelope.target_service.as_deref() {
                Some(service) if service == self.service_name() => self.handle_call(envelope),
                _ => Handled::Ignored,
            },
        }
    }

    fn handle_broadcast(&self, envelope: &Envelope) -> Handled {
        let Some(event) = envelope.event_name.as_deref() else {
            return Handled::Ignored;
        };
        self.run_message(envelope, event)
    }

    fn handle_message(&self, envelope: &Envelope) -> Handled {
        let Some(event) = envelope.event_name.as_deref() else {
            return Handled::Ignored;
        };
        match self.claims.process(&envelope.id, || self.run_message(envelope, event)) {
            Ok(Some(handled)) => handled,
            Ok(None) => Handled::Skipped,
            Err(e) => self.store_failure(envelope, e),
        }
    }

    fn run_message(&self, envelope: &Envelope, event: &str) -> Handled {
        let conn = Connection::from_envelope(envelope);
        let data = envelope.payload.clone().unwrap_or(Value::Null);
        match contain(|| self.dispatcher.dispatch_bus_message(event, data, &conn)) {
            Ok(Ok(Dispatch::Unmatched)) => Handled::Unmatched,
            Ok(Ok(_)) => Handled::Dispatched,
            Ok(Err(e)) => {
                error!(
                    instance = %self.instance_id(),
                    message_id = %envelope.id,
                    event,
                    error = %e,
                    "bus message handler failed"
                );
                Handled::Failed
            }
            Err(cause) => {
                error!(
                    instance = %self.instance_id(),
                    message_id = %envelope.id,
                    event,
                    panic = %cause,
                    "bus message handler panicked"
                );
                Handled::Failed
            }
        }
    }

    fn handle_call(&self, envelope: &Envelope) -> Handled {
        let (Some(event), Some(correlation_id)) =
            (envelope.event_name.as_deref(), envelope.correlation_id.as_deref())
        else {
            warn!(message_id = %envelope.id, "call without event or correlation id");
            return Handled::Ignored;
        };

        let outcome = self.claims.process(&envelope.id, || {
            let reply = self.run_call(envelope, event);
            let handled = match &reply {
                CallReply::Ok(_) => Handled::Dispatched,
                CallReply::Err(_) => Handled::Failed,
            };
            match self.send_reply(envelope, event, correlation_id, reply) {
                Ok(()) => handled,
                Err(e) => {
                    warn!(correlation_id, error = %e, "failed to publish call reply");
                    Handled::Failed
                }
            }
        });

        match outcome {
            Ok(Some(handled)) => handled,
            Ok(None) => Handled::Skipped,
            Err(e) => self.store_failure(envelope, e),
        }
    }

    fn run_call(&self, envelope: &Envelope, event: &str) -> CallReply {
        let conn = Connection::from_envelope(envelope);
        let data = envelope.payload.clone().unwrap_or(Value::Null);
        match contain(|| self.dispatcher.dispatch_bus_call(event, data, &conn)) {
            Ok(Ok(Dispatch::Unmatched)) => {
                debug!(event, "no bus call bound");
                CallReply::Err(format!("no bus call bound for {event}"))
            }
            Ok(Ok(dispatch)) => CallReply::Ok(dispatch.into_reply().unwrap_or(Value::Null)),
            Ok(Err(e)) => {
                debug!(event, error = %e, "bus call handler failed");
                CallReply::Err(e.to_string())
            }
            Err(cause) => {
                error!(message_id = %envelope.id, event, panic = %cause, "bus call handler panicked");
                CallReply::Err(format!("handler panicked: {cause}"))
            }
        }
    }

    fn send_reply(
        &self,
        call: &Envelope,
        event: &str,
        correlation_id: &str,
        reply: CallReply,
    ) -> Result<(), BusError> {
        let envelope = Envelope::new(self.instance_id(), EnvelopeKind::CallReturn)
            .with_event(event)
            .with_payload(serde_json::to_value(reply)?)
            .with_correlation(correlation_id);
        self.publish_envelope(&envelope)?;
        debug!(correlation_id, caller = %call.sender_id, "reply sent");
        Ok(())
    }

    fn handle_call_return(&self, envelope: &Envelope) -> Handled {
        let Some(correlation_id) = envelope.correlation_id.as_deref() else {
            return Handled::Ignored;
        };
        let payload = envelope.payload.clone().unwrap_or(Value::Null);
        let reply = serde_json::from_value(payload)
            .unwrap_or_else(|e| CallReply::Err(format!("malformed call reply: {e}")));
        if self.calls.resolve(correlation_id, reply) {
            Handled::Resolved
        } else {
            Handled::Unmatched
        }
    }

    fn store_failure(&self, envelope: &Envelope, e: StoreError) -> Handled {
        warn!(
            instance = %self.instance_id(),
            message_id = %envelope.id,
            error = %e,
            "claim failed, message dropped"
        );
        Handled::Failed
    }

    /// Subscribe, start the worker pools and the heartbeat, and announce
    /// this instance to the fleet.
    pub fn start(self: &Arc<Self>) -> Result<BusHandle<S>, BusError> {
        // Dropping the handle on an early return stops whatever was spawned.
        let mut handle = BusHandle {
            bus: Arc::clone(self),
            stop: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            heartbeat: None,
        };

        let own_channel = service_channel(self.service_name());
        for channel in [GLOBAL_CHANNEL, own_channel.as_str()] {
            let subscription = self.store.subscribe(&[channel])?;
            let threads = self.spawn_stream(channel, subscription, &handle.stop);
            handle.threads.extend(threads);
        }

        handle.heartbeat = Some(self.registry.start_heartbeat());
        self.registry.announce_connect()?;
        info!(
            service = %self.service_name(),
            instance = %self.instance_id(),
            workers = self.options.workers,
            "bus started"
        );
        Ok(handle)
    }

    fn spawn_stream(
        self: &Arc<Self>,
        channel: &str,
        subscription: Box<dyn Subscription>,
        stop: &Arc<AtomicBool>,
    ) -> Vec<JoinHandle<()>> {
        let (tx, rx) = sync_channel(self.options.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut threads = Vec::with_capacity(self.options.workers + 1);
        threads.push(self.spawn_reader(channel.to_string(), subscription, tx, Arc::clone(stop)));
        for _ in 0..self.options.workers.max(1) {
            threads.push(self.spawn_worker(Arc::clone(&rx)));
        }
        threads
    }

    fn spawn_reader(
        self: &Arc<Self>,
        channel: String,
        mut subscription: Box<dyn Subscription>,
        tx: SyncSender<Envelope>,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                match subscription.next_message(bus.options.poll_interval) {
                    Ok(Some(message)) => match Envelope::decode(&message.payload) {
                        Ok(envelope) if envelope.kind == EnvelopeKind::CallReturn => {
                            bus.receive(&envelope);
                        }
                        Ok(envelope) => {
                            if tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            bus.reject(&e);
                        }
                    },
                    Ok(None) => {
                        bus.calls.prune_expired();
                    }
                    Err(StoreError::Closed) => {
                        warn!(channel = %channel, "subscription closed");
                        break;
                    }
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "subscription read failed");
                        thread::sleep(bus.options.poll_interval);
                    }
                }
            }
            debug!(channel = %channel, "reader stopped");
        })
    }

    fn spawn_worker(self: &Arc<Self>, rx: Arc<Mutex<Receiver<Envelope>>>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        thread::spawn(move || loop {
            // The lock is released before handling so workers run in parallel.
            let next = match rx.lock() {
                Ok(rx) => rx.recv(),
                Err(_) => break,
            };
            match next {
                Ok(envelope) => {
                    bus.receive(&envelope);
                }
                Err(_) => break,
            }
        })
    }
}

/// Run `f`, turning a panic into its message.
fn contain<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<S: KeyValueBus + 'static> Fleet for Bus<S> {
    fn service_name(&self) -> &str {
        Bus::service_name(self)
    }

    fn instance_id(&self) -> &str {
        Bus::instance_id(self)
    }

    fn message(&self, service: &str, event: &str, payload: Value) -> Result<String, BusError> {
        Bus::message(self, service, event, payload)
    }

    fn broadcast(&self, event: &str, payload: Value) -> Result<String, BusError> {
        Bus::broadcast(self, event, payload)
    }

    fn call(
        &self,
        service: &str,
        event: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        let timeout = timeout.unwrap_or(self.options.call_timeout);
        self.call_with_timeout(service, event, payload, timeout)
    }

    fn use_metric_provider(&self, provider: MetricProvider) {
        self.registry.use_metric_provider(move || provider());
    }
}

/// Handle to a started bus. Call [`shutdown`](Self::shutdown) for a clean
/// stop; dropping it only signals the threads.
pub struct BusHandle<S: KeyValueBus + 'static> {
    bus: Arc<Bus<S>>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    heartbeat: Option<HeartbeatHandle>,
}

impl<S: KeyValueBus + 'static> BusHandle<S> {
    pub fn bus(&self) -> &Arc<Bus<S>> {
        &self.bus
    }

    /// Stop heartbeats, leave both channels, drain the queues, announce the
    /// disconnect (best effort) and fail any calls still waiting.
    pub fn shutdown(mut self) -> BusStats {
        if let Some(heartbeat) = self.heartbeat.take() {
            let beats = heartbeat.stop();
            debug!(beats, "heartbeat stopped");
        }

        self.stop.store(true, Ordering::SeqCst);
        for handle in std::mem::take(&mut self.threads) {
            if handle.join().is_err() {
                warn!(instance = %self.bus.instance_id(), "bus thread panicked");
            }
        }

        if let Err(e) = self.bus.registry.announce_disconnect() {
            warn!(instance = %self.bus.instance_id(), error = %e, "disconnect announcement failed");
        }
        self.bus.calls.close();

        let stats = self.bus.stats();
        info!(
            service = %self.bus.service_name(),
            instance = %self.bus.instance_id(),
            ?stats,
            "bus stopped"
        );
        stats
    }
}

impl<S: KeyValueBus + 'static> Drop for BusHandle<S> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
