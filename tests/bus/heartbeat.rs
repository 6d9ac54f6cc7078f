//! Heartbeats, metric providers and fleet listing.

use std::sync::Arc;
use std::time::Duration;

use netjam_rust::bus::{heartbeat_key, HeartbeatRecord, MetricValue, Metrics};
use netjam_rust::store::{InMemoryStore, KeyValueBus};

use crate::support::{start_instance, wait_until};

fn read_record(store: &InMemoryStore, service: &str, instance: &str) -> Option<HeartbeatRecord> {
    let raw = store.get(&heartbeat_key(service, instance)).unwrap()?;
    Some(serde_json::from_str(&raw).unwrap())
}

#[test]
fn record_carries_merged_metrics() {
    let store = Arc::new(InMemoryStore::new());
    let (bus, handle) = start_instance(&store, "billing", "b-0", vec![]);
    bus.use_metric_provider(|| Metrics::from([("CPU".to_string(), MetricValue::from("5%"))]));
    bus.use_metric_provider(|| Metrics::from([("RAM".to_string(), MetricValue::from("100/200"))]));

    let expected = Metrics::from([
        ("CPU".to_string(), MetricValue::from("5%")),
        ("RAM".to_string(), MetricValue::from("100/200")),
    ]);
    assert!(wait_until(Duration::from_secs(2), || {
        read_record(&store, "billing", "b-0").is_some_and(|r| r.metrics == expected)
    }));

    let record = read_record(&store, "billing", "b-0").unwrap();
    assert_eq!(record.service_name, "billing");
    assert_eq!(record.instance_id, "b-0");
    handle.shutdown();
}

#[test]
fn first_beat_is_written_at_start() {
    let store = Arc::new(InMemoryStore::new());
    let (_bus, handle) = start_instance(&store, "billing", "b-0", vec![]);
    assert!(wait_until(Duration::from_millis(30), || {
        read_record(&store, "billing", "b-0").is_some()
    }));
    handle.shutdown();
}

#[test]
fn live_services_follow_heartbeats() {
    let store = Arc::new(InMemoryStore::new());
    let (bus, billing) = start_instance(&store, "billing", "b-0", vec![]);
    let (_, mailer) = start_instance(&store, "mailer", "m-0", vec![]);

    assert!(wait_until(Duration::from_secs(1), || {
        bus.registry().list_live_services().unwrap().len() == 2
    }));
    assert_eq!(bus.registry().live_records().unwrap().len(), 2);

    // a stopped instance drops out once its record expires
    mailer.shutdown();
    assert!(wait_until(Duration::from_secs(1), || {
        let live = bus.registry().list_live_services().unwrap();
        live.len() == 1 && live.iter().all(|i| i.service_name == "billing")
    }));

    billing.shutdown();
}
