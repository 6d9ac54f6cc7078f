//! Binding tables and positional argument resolution.

use std::sync::{Arc, Mutex};

use netjam_rust::rpc::{
    inject, Arg, BindError, Connection, Dispatch, Handshake, MethodBinding, Origin,
    ProviderDescriptor, RpcDispatcher, Table,
};
use serde_json::{json, Value};

#[test]
fn injected_connection_is_interleaved_with_payload() {
    let seen: Arc<Mutex<Vec<Arg>>> = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let dispatcher = RpcDispatcher::bind(&[ProviderDescriptor::new("rooms")
        .namespace("rooms")
        .bind(
            MethodBinding::message("join", 3, move |args| {
                *record.lock().unwrap() = args.into_vec();
                Ok(Value::Null)
            })
            .inject(1, inject::connection()),
        )])
    .unwrap();

    let conn = Connection::socket("sock-1");
    dispatcher
        .dispatch_message("rooms::join", json!([10, 20]), &conn)
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(matches!(&seen[0], Arg::Value(v) if *v == json!(10)));
    assert!(matches!(&seen[1], Arg::Connection(c) if c.same(&conn)));
    assert!(matches!(&seen[2], Arg::Value(v) if *v == json!(20)));
}

#[test]
fn handshake_can_be_injected_anywhere() {
    let dispatcher = RpcDispatcher::bind(&[ProviderDescriptor::new("auth")
        .namespace("auth")
        .bind(
            MethodBinding::remote_call("whoami", 2, |args| {
                let handshake = args.handshake(0)?;
                let greeting: String = args.get(1)?;
                Ok(json!({
                    "user": handshake.get("x-user-id"),
                    "greeting": greeting,
                }))
            })
            .inject(0, inject::handshake()),
        )])
    .unwrap();

    let conn = Connection::new(
        "sock-2",
        Origin::Socket,
        Handshake::new().with("x-user-id", "u-1"),
    );
    let reply = dispatcher
        .dispatch_call("auth::whoami", json!("hello"), &conn)
        .unwrap()
        .into_reply();
    assert_eq!(reply, Some(json!({ "user": "u-1", "greeting": "hello" })));
}

#[test]
fn remote_name_overrides_method_name() {
    let dispatcher = RpcDispatcher::bind(&[ProviderDescriptor::new("chat")
        .namespace("chat")
        .bind(MethodBinding::remote_call("send_message", 1, |args| Ok(json!(args.len()))).remote_name("send"))])
    .unwrap();

    let conn = Connection::socket("s");
    assert!(dispatcher.has(Table::SocketCall, "chat::send"));
    assert_eq!(
        dispatcher.dispatch_call("chat::send_message", Value::Null, &conn).unwrap(),
        Dispatch::Unmatched
    );
}

#[test]
fn events_for_other_namespaces_are_no_ops() {
    let dispatcher = RpcDispatcher::bind(&[ProviderDescriptor::new("chat")
        .namespace("chat")
        .bind(MethodBinding::message("send", 1, |_| Ok(Value::Null)))])
    .unwrap();

    let conn = Connection::socket("s");
    let outcome = dispatcher.dispatch_message("lobby::send", json!([1]), &conn).unwrap();
    assert_eq!(outcome, Dispatch::Unmatched);
    // a message binding does not answer calls
    let outcome = dispatcher.dispatch_call("chat::send", json!([1]), &conn).unwrap();
    assert_eq!(outcome, Dispatch::Unmatched);
}

#[test]
fn duplicate_binding_names_namespace_and_event() {
    let err = RpcDispatcher::bind(&[
        ProviderDescriptor::new("a").bind(MethodBinding::bus_call("sum", 2, |_| Ok(Value::Null))),
        ProviderDescriptor::new("b").bind(MethodBinding::bus_call("sum", 1, |_| Ok(Value::Null))),
    ])
    .unwrap_err();

    assert_eq!(
        err,
        BindError::DuplicateBinding {
            namespace: "default".into(),
            event: "sum".into(),
            table: Table::BusCall,
        }
    );
    assert!(err.to_string().contains("\"default\""));
}

#[test]
fn same_event_in_different_namespaces_is_fine() {
    let dispatcher = RpcDispatcher::bind(&[
        ProviderDescriptor::new("a")
            .namespace("a")
            .bind(MethodBinding::message("ping", 0, |_| Ok(Value::Null))),
        ProviderDescriptor::new("b")
            .namespace("b")
            .bind(MethodBinding::message("ping", 0, |_| Ok(Value::Null))),
    ])
    .unwrap();

    assert_eq!(dispatcher.events(Table::SocketMessage), vec!["a::ping", "b::ping"]);
}
