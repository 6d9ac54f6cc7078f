//! HTTP transport for the socket tables — maps HTTP requests to dispatch.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `POST /emit/:event` — fire-and-forget. Body = event data, request headers → handshake.
//!   Always `202 Accepted` unless the handler fails.
//! - `POST /call/:event` — call-with-return. Responds with the reply, or `404` when unbound.
//! - `GET /health` — `{ "ok": true, "messages": [...], "calls": [...] }`.
//!
//! Event names are full dispatch keys (`chat::send`).
//!
//! ## Example
//!
//! ```ignore
//! let dispatcher = Arc::new(RpcDispatcher::bind(&descriptors)?);
//! netjam_rust::rpc::serve(dispatcher, "0.0.0.0:3000").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::connection::{Connection, Origin};
use super::dispatcher::{Dispatch, RpcDispatcher, Table};
use super::error::HandlerError;
use super::handshake::Handshake;

/// Build an axum `Router` dispatching into `dispatcher`.
pub fn router(dispatcher: Arc<RpcDispatcher>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/emit/:event", post(emit_handler))
        .route("/call/:event", post(call_handler))
        .with_state(dispatcher)
}

/// Serve the dispatcher over HTTP at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve(dispatcher: Arc<RpcDispatcher>, addr: &str) -> Result<(), std::io::Error> {
    let app = router(dispatcher);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http transport listening");
    axum::serve(listener, app).await
}

async fn health_handler(State(dispatcher): State<Arc<RpcDispatcher>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "messages": dispatcher.events(Table::SocketMessage),
        "calls": dispatcher.events(Table::SocketCall),
    }))
}

async fn emit_handler(
    State(dispatcher): State<Arc<RpcDispatcher>>,
    Path(event): Path<String>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Response {
    let conn = connection_from_headers(&headers);
    match dispatcher.dispatch_message(&event, data, &conn) {
        Ok(outcome) => (
            StatusCode::ACCEPTED,
            Json(json!({ "matched": outcome.is_matched() })),
        )
            .into_response(),
        Err(e) => error_response(&event, e),
    }
}

async fn call_handler(
    State(dispatcher): State<Arc<RpcDispatcher>>,
    Path(event): Path<String>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Response {
    let conn = connection_from_headers(&headers);
    match dispatcher.dispatch_call(&event, data, &conn) {
        Ok(Dispatch::Unmatched) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no remote call bound for {event}") })),
        )
            .into_response(),
        Ok(outcome) => (StatusCode::OK, Json(outcome.into_reply().unwrap_or(Value::Null))).into_response(),
        Err(e) => error_response(&event, e),
    }
}

fn error_response(event: &str, e: HandlerError) -> Response {
    tracing::warn!(event, error = %e, "handler failed");
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

/// One connection per request; all headers, lowercased, become the handshake.
fn connection_from_headers(headers: &HeaderMap) -> Connection {
    let mut vars = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            vars.insert(name.as_str().to_string(), v.to_string());
        }
    }
    Connection::new(
        uuid::Uuid::new_v4().to_string(),
        Origin::Http,
        Handshake::from_map(vars),
    )
}
