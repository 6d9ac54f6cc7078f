//! Claim protocol across live replicas sharing one store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netjam_rust::bus::Envelope;
use netjam_rust::rpc::{inject, MethodBinding, ProviderDescriptor, MESSAGE_ID_KEY};
use netjam_rust::store::KeyValueBus;
use serde_json::{json, Value};

use crate::support::{start_instance, wait_until, CountingStore};

const REPLICAS: usize = 3;

/// Each replica records which message ids its handler completed.
///
/// The handler holds its claim until every other replica has tried and lost,
/// so the outcome does not depend on thread scheduling.
fn orders_provider(
    store: CountingStore,
    instance: String,
    completed: Arc<Mutex<Vec<(String, String)>>>,
) -> ProviderDescriptor {
    ProviderDescriptor::new("orders").namespace("orders").bind(
        MethodBinding::bus_message("place", 2, move |args| {
            let handshake = args.handshake(1)?;
            let message_id = handshake.get(MESSAGE_ID_KEY).unwrap_or_default().to_string();
            let others_lost = wait_until(Duration::from_secs(2), || {
                store.lost_for(&message_id) >= REPLICAS - 1
            });
            assert!(others_lost, "other replicas never attempted {message_id}");
            completed
                .lock()
                .unwrap()
                .push((message_id, instance.clone()));
            Ok(Value::Null)
        })
        .inject(1, inject::handshake()),
    )
}

#[test]
fn each_message_is_handled_by_exactly_one_replica() {
    let store = CountingStore::new();
    let shared = Arc::new(store.clone());
    let completed = Arc::new(Mutex::new(Vec::new()));

    let replicas: Vec<_> = (0..REPLICAS)
        .map(|i| {
            let instance = format!("orders-{i}");
            let provider = orders_provider(store.clone(), instance.clone(), Arc::clone(&completed));
            start_instance(&shared, "orders", &instance, vec![provider])
        })
        .collect();

    let (sender, _) = &replicas[0];
    let ids: Vec<String> = (0..5)
        .map(|n| sender.message("orders", "orders::place", json!([n])).unwrap())
        .collect();

    assert!(wait_until(Duration::from_secs(5), || {
        completed.lock().unwrap().len() >= ids.len()
    }));
    // give stragglers a chance to (wrongly) run twice
    std::thread::sleep(Duration::from_millis(100));

    let completed = completed.lock().unwrap().clone();
    let mut per_id: HashMap<&str, usize> = HashMap::new();
    for (id, _) in &completed {
        *per_id.entry(id.as_str()).or_default() += 1;
    }
    for id in &ids {
        assert_eq!(per_id.get(id.as_str()), Some(&1), "message {id}");
        assert_eq!(store.lost_for(id), REPLICAS - 1);
        // claims are released after processing
        assert_eq!(store.get(id).unwrap(), None);
    }

    let skipped: u64 = replicas.iter().map(|(bus, _)| bus.stats().skipped).sum();
    assert_eq!(skipped, (ids.len() * (REPLICAS - 1)) as u64);

    for (_, handle) in replicas {
        handle.shutdown();
    }
}

#[test]
fn republished_id_is_processed_again() {
    let store = CountingStore::new();
    let shared = Arc::new(store.clone());
    let runs = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&runs);
    let provider = ProviderDescriptor::new("orders").namespace("orders").bind(
        MethodBinding::bus_message("place", 0, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(Value::Null)
        }),
    );
    let (bus, handle) = start_instance(&shared, "orders", "orders-0", vec![provider]);

    let envelope = Envelope::new("client", netjam_rust::EnvelopeKind::Message)
        .to_service("orders")
        .with_event("orders::place");
    bus.publish_envelope(&envelope).unwrap();
    assert!(wait_until(Duration::from_secs(2), || *runs.lock().unwrap() == 1));
    assert!(wait_until(Duration::from_secs(2), || store.get(&envelope.id).unwrap().is_none()));

    // same id, published again after the claim was released
    bus.publish_envelope(&envelope).unwrap();
    assert!(wait_until(Duration::from_secs(2), || *runs.lock().unwrap() == 2));

    handle.shutdown();
}
