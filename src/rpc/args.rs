//! Positional handler arguments and their resolution.
//!
//! A binding declares how many positional parameters its handler takes. Each
//! position is either injected (a resolver registered for that index supplies
//! it) or filled from the event payload, consuming payload elements in order.
//!
//! ```text
//!   arity 3, injected = { 1: connection }, payload = [10, 20]
//!
//!   index 0 ── payload ──▶ 10
//!   index 1 ── resolver ─▶ <connection>
//!   index 2 ── payload ──▶ 20
//! ```

use std::collections::VecDeque;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::connection::Connection;
use super::descriptor::MethodBinding;
use super::error::HandlerError;
use super::handshake::Handshake;

/// One resolved positional argument.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Payload data (or an injected JSON value).
    Value(Value),
    /// The connection the event arrived on.
    Connection(Connection),
    /// The connection's handshake metadata.
    Handshake(Handshake),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

/// Resolved arguments passed to a handler.
///
/// ## Example
///
/// ```ignore
/// |args: Args| {
///     let room: String = args.get(0)?;
///     let client = args.connection(1)?;
///     Ok(json!({ "room": room, "client": client.id() }))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Args {
    event: String,
    values: Vec<Arg>,
}

impl Args {
    pub fn new(event: impl Into<String>, values: Vec<Arg>) -> Self {
        Self {
            event: event.into(),
            values,
        }
    }

    /// The namespaced event being handled.
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.values.get(index)
    }

    /// The JSON value at `index`, if that position holds one.
    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.values.get(index) {
            Some(Arg::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Deserialize the value at `index` into a typed struct.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self.value(index).ok_or_else(|| HandlerError::MissingArgument {
            index,
            reason: "not a payload value".into(),
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| HandlerError::DecodeFailed(format!("argument {index}: {e}")))
    }

    /// The connection injected at `index`.
    pub fn connection(&self, index: usize) -> Result<&Connection, HandlerError> {
        match self.values.get(index) {
            Some(Arg::Connection(conn)) => Ok(conn),
            _ => Err(HandlerError::MissingArgument {
                index,
                reason: "no connection injected".into(),
            }),
        }
    }

    /// The handshake injected at `index`.
    pub fn handshake(&self, index: usize) -> Result<&Handshake, HandlerError> {
        match self.values.get(index) {
            Some(Arg::Handshake(handshake)) => Ok(handshake),
            _ => Err(HandlerError::MissingArgument {
                index,
                reason: "no handshake injected".into(),
            }),
        }
    }

    pub fn into_vec(self) -> Vec<Arg> {
        self.values
    }
}

/// Turn transport data into a positional argument list.
///
/// An array is the argument list; `null` is no arguments; anything else is a
/// single argument.
pub fn positional(data: Value) -> Vec<Value> {
    match data {
        Value::Array(values) => values,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Build the handler's argument list from the (post-middleware) payload.
///
/// Positions past the end of the payload resolve to `null`; payload
/// elements past the declared arity are ignored.
pub(crate) fn resolve(binding: &MethodBinding, data: &[Value], conn: &Connection) -> Vec<Arg> {
    let mut payload: VecDeque<&Value> = data.iter().collect();
    (0..binding.arity())
        .map(|index| match binding.injected(index) {
            Some(resolver) => resolver(data, conn),
            None => Arg::Value(payload.pop_front().cloned().unwrap_or(Value::Null)),
        })
        .collect()
}
