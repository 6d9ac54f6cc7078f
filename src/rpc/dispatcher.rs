//! RpcDispatcher — routes transport events to bound handlers.
//!
//! Bindings are resolved once, at construction, into four tables keyed by
//! `"<namespace>::<event>"`. Transports then look up the table matching their
//! semantics: a call expects a reply, a message does not.
//!
//! ```text
//!   (event, data, conn)
//!        │
//!        ├─ lookup table ──── miss ──▶ Dispatch::Unmatched
//!        │
//!        ├─ positional(data) ──▶ middleware chain ── short_circuit ──▶ Dispatch::ShortCircuited
//!        │
//!        └─ resolve args ──▶ handler ──▶ Dispatch::Completed
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;

use super::args::{self, Args};
use super::connection::Connection;
use super::descriptor::{MethodBinding, ProviderDescriptor};
use super::error::{BindError, HandlerError};
use super::middleware::{run_chain, ChainOutcome};
use crate::bus::KEY_DELIMITER;

/// One of the four dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    SocketMessage,
    SocketCall,
    BusMessage,
    BusCall,
}

impl Table {
    /// True for tables whose handlers produce a reply.
    pub fn expects_reply(self) -> bool {
        matches!(self, Table::SocketCall | Table::BusCall)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::SocketMessage => "message",
            Table::SocketCall => "remote call",
            Table::BusMessage => "bus message",
            Table::BusCall => "bus call",
        };
        f.write_str(name)
    }
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// No binding for the event in the consulted table.
    Unmatched,
    /// A middleware stopped the chain; the handler did not run.
    ShortCircuited(Option<Value>),
    /// The handler ran and returned this value.
    Completed(Value),
}

impl Dispatch {
    pub fn is_matched(&self) -> bool {
        !matches!(self, Dispatch::Unmatched)
    }

    /// The reply a caller should receive, `None` when nothing matched.
    pub fn into_reply(self) -> Option<Value> {
        match self {
            Dispatch::Unmatched => None,
            Dispatch::ShortCircuited(value) => Some(value.unwrap_or(Value::Null)),
            Dispatch::Completed(value) => Some(value),
        }
    }
}

#[derive(Debug, Clone)]
struct Route {
    namespace: String,
    binding: MethodBinding,
}

/// A REST binding, exposed for an external router.
#[derive(Debug, Clone, Copy)]
pub struct RestRoute<'a> {
    pub namespace: &'a str,
    pub binding: &'a MethodBinding,
}

/// Join a namespace and event name into a dispatch key.
pub fn event_key(namespace: &str, event: &str) -> String {
    format!("{namespace}{KEY_DELIMITER}{event}")
}

/// Immutable routing tables built from provider descriptors.
#[derive(Debug, Default)]
pub struct RpcDispatcher {
    tables: HashMap<Table, HashMap<String, Route>>,
    rest: Vec<Route>,
}

impl RpcDispatcher {
    /// Build the tables, rejecting duplicate bindings and out-of-range
    /// injected parameters.
    pub fn bind(descriptors: &[ProviderDescriptor]) -> Result<Self, BindError> {
        let mut dispatcher = Self::default();

        for descriptor in descriptors {
            let namespace = descriptor.namespace_or_default();
            for binding in descriptor.bindings() {
                if let Some(index) = binding.injected_indices().find(|i| *i >= binding.arity()) {
                    return Err(BindError::InjectionOutOfRange {
                        namespace: namespace.to_string(),
                        method: binding.method().to_string(),
                        index,
                        arity: binding.arity(),
                    });
                }

                let route = Route {
                    namespace: namespace.to_string(),
                    binding: binding.clone(),
                };

                let Some(table) = binding.kind().table() else {
                    dispatcher.rest.push(route);
                    continue;
                };

                let key = event_key(namespace, binding.event_name());
                let entries = dispatcher.tables.entry(table).or_default();
                if entries.contains_key(&key) {
                    return Err(BindError::DuplicateBinding {
                        namespace: namespace.to_string(),
                        event: binding.event_name().to_string(),
                        table,
                    });
                }
                tracing::debug!(provider = descriptor.name(), %table, event = %key, "bound");
                entries.insert(key, route);
            }
        }

        Ok(dispatcher)
    }

    /// Dispatch a socket fire-and-forget event.
    pub fn dispatch_message(
        &self,
        event: &str,
        data: Value,
        conn: &Connection,
    ) -> Result<Dispatch, HandlerError> {
        self.dispatch(Table::SocketMessage, event, data, conn)
    }

    /// Dispatch a socket call-with-return event.
    pub fn dispatch_call(
        &self,
        event: &str,
        data: Value,
        conn: &Connection,
    ) -> Result<Dispatch, HandlerError> {
        self.dispatch(Table::SocketCall, event, data, conn)
    }

    /// Dispatch a bus fire-and-forget event.
    pub fn dispatch_bus_message(
        &self,
        event: &str,
        data: Value,
        conn: &Connection,
    ) -> Result<Dispatch, HandlerError> {
        self.dispatch(Table::BusMessage, event, data, conn)
    }

    /// Dispatch a bus call-with-return event.
    pub fn dispatch_bus_call(
        &self,
        event: &str,
        data: Value,
        conn: &Connection,
    ) -> Result<Dispatch, HandlerError> {
        self.dispatch(Table::BusCall, event, data, conn)
    }

    /// Dispatch `event` through `table`.
    ///
    /// For message tables the handler's return value and any short-circuit
    /// value are discarded.
    pub fn dispatch(
        &self,
        table: Table,
        event: &str,
        data: Value,
        conn: &Connection,
    ) -> Result<Dispatch, HandlerError> {
        let Some(route) = self.tables.get(&table).and_then(|t| t.get(event)) else {
            tracing::debug!(%table, event, "no binding");
            return Ok(Dispatch::Unmatched);
        };

        let binding = &route.binding;
        let mut data = args::positional(data);

        if let ChainOutcome::ShortCircuit(value) = run_chain(binding.middlewares(), &mut data, conn)? {
            tracing::debug!(%table, event, namespace = %route.namespace, "short-circuited");
            let value = if table.expects_reply() { value } else { None };
            return Ok(Dispatch::ShortCircuited(value));
        }

        let resolved = args::resolve(binding, &data, conn);
        let value = (binding.handler())(Args::new(event, resolved))?;

        if table.expects_reply() {
            Ok(Dispatch::Completed(value))
        } else {
            Ok(Dispatch::Completed(Value::Null))
        }
    }

    /// True when `event` is bound in `table`.
    pub fn has(&self, table: Table, event: &str) -> bool {
        self.tables.get(&table).is_some_and(|t| t.contains_key(event))
    }

    /// Bound event keys in `table`, sorted.
    pub fn events(&self, table: Table) -> Vec<String> {
        let mut events: Vec<String> = self
            .tables
            .get(&table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        events.sort();
        events
    }

    /// Every bound event, grouped by table.
    pub fn summary(&self) -> BTreeMap<Table, Vec<String>> {
        self.tables.keys().map(|table| (*table, self.events(*table))).collect()
    }

    /// GET/POST bindings, in registration order.
    pub fn rest_bindings(&self) -> Vec<RestRoute<'_>> {
        self.rest
            .iter()
            .map(|route| RestRoute {
                namespace: &route.namespace,
                binding: &route.binding,
            })
            .collect()
    }
}
