//! Unaddressed messages reach every instance, without claims.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netjam_rust::rpc::{MethodBinding, ProviderDescriptor};
use netjam_rust::store::InMemoryStore;
use serde_json::{json, Value};

use crate::support::{start_instance, wait_until};

fn listener(hits: Arc<AtomicUsize>) -> ProviderDescriptor {
    ProviderDescriptor::new("config").namespace("config").bind(MethodBinding::bus_message(
        "reload",
        1,
        move |args| {
            assert_eq!(args.value(0), Some(&json!("v2")));
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        },
    ))
}

#[test]
fn broadcast_reaches_every_instance() {
    let store = Arc::new(InMemoryStore::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let instances = vec![
        start_instance(&store, "orders", "o-0", vec![listener(Arc::clone(&hits))]),
        start_instance(&store, "orders", "o-1", vec![listener(Arc::clone(&hits))]),
        start_instance(&store, "billing", "b-0", vec![listener(Arc::clone(&hits))]),
    ];

    let (sender, _) = &instances[0];
    sender.broadcast("config::reload", json!("v2")).unwrap();

    assert!(wait_until(Duration::from_secs(2), || hits.load(Ordering::SeqCst) == 3));
    for (bus, _) in &instances {
        assert_eq!(bus.claim_stats().won + bus.claim_stats().lost, 0);
    }

    for (_, handle) in instances {
        handle.shutdown();
    }
}

#[test]
fn unbound_events_are_ignored() {
    let store = Arc::new(InMemoryStore::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let (bus, handle) = start_instance(&store, "orders", "o-0", vec![listener(Arc::clone(&hits))]);

    bus.broadcast("other::event", Value::Null).unwrap();
    bus.message("orders", "orders::unknown", Value::Null).unwrap();

    assert!(wait_until(Duration::from_secs(2), || bus.stats().unmatched >= 2));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(bus.stats().failed, 0);
    handle.shutdown();
}
