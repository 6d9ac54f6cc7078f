//! HTTP transport tests (requires the `http` feature).
//!
//! Starts an axum server and exercises it with reqwest.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use netjam_rust::rpc::{self, inject, HandlerError, MethodBinding, ProviderDescriptor, RpcDispatcher};
use serde_json::{json, Value};

fn chat_dispatcher(sent: Arc<AtomicUsize>) -> Arc<RpcDispatcher> {
    Arc::new(
        RpcDispatcher::bind(&[ProviderDescriptor::new("chat")
            .namespace("chat")
            .bind(MethodBinding::message("send", 1, move |_| {
                sent.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }))
            .bind(
                MethodBinding::remote_call("whoami", 1, |args| {
                    let handshake = args.handshake(0)?;
                    let user = handshake
                        .get("x-user-id")
                        .ok_or_else(|| HandlerError::Unauthorized("no user".into()))?;
                    Ok(json!({ "user": user }))
                })
                .inject(0, inject::handshake()),
            )
            .bind(MethodBinding::remote_call("add", 2, |args| {
                let a: i64 = args.get(0)?;
                let b: i64 = args.get(1)?;
                Ok(json!(a + b))
            }))])
        .unwrap(),
    )
}

/// Bind to port 0 and return the actual address.
async fn start_server(dispatcher: Arc<RpcDispatcher>) -> String {
    let app = rpc::router(dispatcher);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn health_lists_bound_events() {
    let base = start_server(chat_dispatcher(Arc::new(AtomicUsize::new(0)))).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["messages"], json!(["chat::send"]));
    assert_eq!(body["calls"], json!(["chat::add", "chat::whoami"]));
}

#[tokio::test]
async fn emit_dispatches_message() {
    let sent = Arc::new(AtomicUsize::new(0));
    let base = start_server(chat_dispatcher(Arc::clone(&sent))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/emit/chat::send"))
        .json(&json!(["hello"]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["matched"], true);
    assert_eq!(sent.load(Ordering::SeqCst), 1);

    // unbound events are accepted and ignored
    let resp = client
        .post(format!("{base}/emit/chat::nope"))
        .json(&Value::Null)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["matched"], false);
}

#[tokio::test]
async fn call_returns_handler_reply() {
    let base = start_server(chat_dispatcher(Arc::new(AtomicUsize::new(0)))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/call/chat::add"))
        .json(&json!([2, 40]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!(42));
}

#[tokio::test]
async fn headers_become_the_handshake() {
    let base = start_server(chat_dispatcher(Arc::new(AtomicUsize::new(0)))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/call/chat::whoami"))
        .header("X-User-Id", "u-7")
        .json(&Value::Null)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "user": "u-7" }));

    let resp = client
        .post(format!("{base}/call/chat::whoami"))
        .json(&Value::Null)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn unbound_call_is_not_found() {
    let base = start_server(chat_dispatcher(Arc::new(AtomicUsize::new(0)))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/call/chat::missing"))
        .json(&json!([]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
