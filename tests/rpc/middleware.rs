//! Middleware chains in front of handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use netjam_rust::rpc::{
    Connection, Dispatch, HandlerError, MethodBinding, ProviderDescriptor, RpcDispatcher,
};
use serde_json::{json, Value};

struct Probe {
    middleware_calls: Arc<Mutex<Vec<usize>>>,
    handler_calls: Arc<AtomicUsize>,
}

/// A call binding with four middlewares; the one at `stop_at` short-circuits.
fn guarded(stop_at: Option<usize>) -> (RpcDispatcher, Probe) {
    let probe = Probe {
        middleware_calls: Arc::new(Mutex::new(Vec::new())),
        handler_calls: Arc::new(AtomicUsize::new(0)),
    };

    let handler_calls = Arc::clone(&probe.handler_calls);
    let mut binding = MethodBinding::remote_call("secret", 1, move |_| {
        handler_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!("from handler"))
    });
    for n in 0..4 {
        let calls = Arc::clone(&probe.middleware_calls);
        binding = binding.middleware(move |_, _, next| {
            calls.lock().unwrap().push(n);
            if Some(n) == stop_at {
                next.short_circuit(Some(json!({ "stopped_by": n })));
            }
            Ok(())
        });
    }

    let dispatcher =
        RpcDispatcher::bind(&[ProviderDescriptor::new("vault").namespace("vault").bind(binding)])
            .unwrap();
    (dispatcher, probe)
}

#[test]
fn short_circuit_skips_later_middlewares_and_handler() {
    let (dispatcher, probe) = guarded(Some(1));

    let outcome = dispatcher
        .dispatch_call("vault::secret", json!([1]), &Connection::socket("s"))
        .unwrap();

    assert_eq!(outcome.into_reply(), Some(json!({ "stopped_by": 1 })));
    assert_eq!(*probe.middleware_calls.lock().unwrap(), vec![0, 1]);
    assert_eq!(probe.handler_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn full_chain_runs_in_registration_order() {
    let (dispatcher, probe) = guarded(None);

    let outcome = dispatcher
        .dispatch_call("vault::secret", json!([1]), &Connection::socket("s"))
        .unwrap();

    assert_eq!(outcome, Dispatch::Completed(json!("from handler")));
    assert_eq!(*probe.middleware_calls.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(probe.handler_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn short_circuit_without_value_replies_null() {
    let dispatcher = RpcDispatcher::bind(&[ProviderDescriptor::new("p").bind(
        MethodBinding::remote_call("m", 0, |_| Ok(json!("handler"))).middleware(|_, _, next| {
            next.short_circuit(None);
            Ok(())
        }),
    )])
    .unwrap();

    let outcome = dispatcher
        .dispatch_call("default::m", Value::Null, &Connection::socket("s"))
        .unwrap();
    assert_eq!(outcome, Dispatch::ShortCircuited(None));
    assert_eq!(outcome.into_reply(), Some(Value::Null));
}

#[test]
fn continue_with_rewrites_handler_arguments() {
    let dispatcher = RpcDispatcher::bind(&[ProviderDescriptor::new("p").namespace("math").bind(
        MethodBinding::remote_call("double", 1, |args| {
            let n: i64 = args.get(0)?;
            Ok(json!(n * 2))
        })
        .middleware(|args, _, next| {
            // clamp the input
            let n = args.first().and_then(Value::as_i64).unwrap_or(0).min(10);
            next.continue_with(Some(vec![json!(n)]));
            Ok(())
        }),
    )])
    .unwrap();

    let reply = dispatcher
        .dispatch_call("math::double", json!([500]), &Connection::socket("s"))
        .unwrap()
        .into_reply();
    assert_eq!(reply, Some(json!(20)));
}

#[test]
fn middleware_can_reject_by_connection() {
    let dispatcher = RpcDispatcher::bind(&[ProviderDescriptor::new("p").namespace("admin").bind(
        MethodBinding::remote_call("purge", 0, |_| Ok(json!("purged"))).middleware(
            |_, conn: &Connection, _| {
                if conn.handshake().get("authorization").is_none() {
                    return Err(HandlerError::Unauthorized("missing token".into()));
                }
                Ok(())
            },
        ),
    )])
    .unwrap();

    let err = dispatcher
        .dispatch_call("admin::purge", Value::Null, &Connection::socket("anon"))
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
}
