//! Startup announcements, shutdown, malformed traffic and failing handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netjam_rust::bus::{BusOptions, Envelope, EnvelopeKind, GLOBAL_CHANNEL};
use netjam_rust::rpc::{MethodBinding, ProviderDescriptor};
use netjam_rust::store::{InMemoryStore, KeyValueBus};
use serde_json::{json, Value};

use crate::support::{fast_options, start_instance, start_with_options, wait_until};

#[test]
fn peers_observe_connect_and_disconnect() {
    let store = Arc::new(InMemoryStore::new());
    let (watcher, watcher_handle) = start_instance(&store, "monitor", "w-0", vec![]);
    let (_, worker_handle) = start_instance(&store, "orders", "o-0", vec![]);

    assert!(wait_until(Duration::from_secs(1), || {
        watcher.registry().announcements_seen().0 >= 2
    }));

    worker_handle.shutdown();
    assert!(wait_until(Duration::from_secs(1), || {
        watcher.registry().announcements_seen().1 >= 1
    }));

    watcher_handle.shutdown();
}

#[test]
fn shutdown_unsubscribes_and_announces() {
    let store = Arc::new(InMemoryStore::new());
    let (bus, handle) = start_instance(&store, "orders", "o-0", vec![]);
    assert_eq!(store.subscriber_count("nj_bus::orders"), 1);

    let stats = handle.shutdown();
    assert_eq!(stats, bus.stats());

    let last = store.published_on(GLOBAL_CHANNEL).pop().unwrap();
    let envelope = Envelope::decode(&last.payload).unwrap();
    assert_eq!(envelope.kind, EnvelopeKind::ServiceDisconnected);
    assert_eq!(envelope.sender_id, "o-0");
    assert_eq!(envelope.target_service.as_deref(), Some("orders"));

    // nothing is listening on the service channel any more
    assert_eq!(store.publish("nj_bus::orders", b"{}").unwrap(), 0);
}

#[test]
fn malformed_envelopes_do_not_stop_the_loop() {
    let store = Arc::new(InMemoryStore::new());
    let (bus, handle) = start_instance(&store, "orders", "o-0", vec![]);

    store.publish("nj_bus::orders", b"not json").unwrap();
    store
        .publish("nj_bus::orders", br#"{"id":"x","senderId":"y","kind":"message","extra":1}"#)
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || bus.stats().malformed == 2));

    // still serving
    bus.message("orders", "orders::anything", serde_json::Value::Null)
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || bus.stats().unmatched >= 1));

    handle.shutdown();
}

#[test]
fn panicking_handler_leaves_the_worker_running() {
    let store = Arc::new(InMemoryStore::new());
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    let provider = ProviderDescriptor::new("orders").namespace("orders").bind(
        MethodBinding::bus_message("risky", 1, move |args| {
            let n: i64 = args.get(0)?;
            if n == 0 {
                panic!("cannot handle zero");
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }),
    );
    let options = BusOptions {
        workers: 1,
        ..fast_options()
    };
    let (bus, handle) = start_with_options(&store, "orders", "o-0", vec![provider], options);

    let first = bus.message("orders", "orders::risky", json!([0])).unwrap();
    bus.message("orders", "orders::risky", json!([1])).unwrap();

    assert!(wait_until(Duration::from_secs(2), || handled.load(Ordering::SeqCst) == 1));
    assert_eq!(bus.stats().failed, 1);
    // the panicking message's claim was released
    assert_eq!(store.get(&first).unwrap(), None);

    handle.shutdown();
}
