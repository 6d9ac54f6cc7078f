//! ProviderDescriptor — the explicit, builder-constructed binding metadata a
//! provider module hands to the dispatcher.
//!
//! ## Example
//!
//! ```ignore
//! use netjam_rust::rpc::{inject, MethodBinding, ProviderDescriptor};
//! use serde_json::json;
//!
//! let chat = ProviderDescriptor::new("chat")
//!     .namespace("chat")
//!     .bind(
//!         MethodBinding::remote_call("join", 2, |args| {
//!             let room: String = args.get(0)?;
//!             let client = args.connection(1)?;
//!             Ok(json!({ "room": room, "client": client.id() }))
//!         })
//!         .inject(1, inject::connection()),
//!     );
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::args::{Arg, Args};
use super::connection::Connection;
use super::dispatcher::Table;
use super::error::HandlerError;
use super::middleware::{Middleware, Next};
use crate::bus::Fleet;

/// Namespace used when a descriptor does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A bound handler.
pub type Handler = Arc<dyn Fn(Args) -> Result<Value, HandlerError> + Send + Sync>;

/// Supplies the value of an injected positional parameter from
/// `(raw args, connection)`.
pub type Resolver = Arc<dyn Fn(&[Value], &Connection) -> Arg + Send + Sync>;

/// Hook run once at node bootstrap.
pub type InitHook = Arc<dyn Fn() -> Result<(), HandlerError> + Send + Sync>;

/// Hook run after the bus has started.
pub type AfterStartHook = Arc<dyn Fn(&dyn Fleet) -> Result<(), HandlerError> + Send + Sync>;

/// How a method is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// REST GET route, served by an external router.
    Get,
    /// REST POST route, served by an external router.
    Post,
    /// Socket fire-and-forget event.
    Message,
    /// Socket call-with-return event.
    RemoteCall,
    /// Bus fire-and-forget event.
    RedisMessage,
    /// Bus call-with-return event.
    RedisCall,
}

impl BindingKind {
    /// The dispatch table this kind is routed through, if any.
    pub fn table(self) -> Option<Table> {
        match self {
            BindingKind::Message => Some(Table::SocketMessage),
            BindingKind::RemoteCall => Some(Table::SocketCall),
            BindingKind::RedisMessage => Some(Table::BusMessage),
            BindingKind::RedisCall => Some(Table::BusCall),
            BindingKind::Get | BindingKind::Post => None,
        }
    }

    pub fn is_rest(self) -> bool {
        matches!(self, BindingKind::Get | BindingKind::Post)
    }
}

/// One method exposed by a provider.
#[derive(Clone)]
pub struct MethodBinding {
    kind: BindingKind,
    method: String,
    remote_name: Option<String>,
    path: Option<String>,
    arity: usize,
    injected: BTreeMap<usize, Resolver>,
    middlewares: Vec<Middleware>,
    handler: Handler,
}

impl MethodBinding {
    /// Bind `method` with `arity` positional parameters.
    pub fn new<F>(kind: BindingKind, method: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self {
            kind,
            method: method.into(),
            remote_name: None,
            path: None,
            arity,
            injected: BTreeMap::new(),
            middlewares: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn message<F>(method: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self::new(BindingKind::Message, method, arity, handler)
    }

    pub fn remote_call<F>(method: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self::new(BindingKind::RemoteCall, method, arity, handler)
    }

    pub fn bus_message<F>(method: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self::new(BindingKind::RedisMessage, method, arity, handler)
    }

    pub fn bus_call<F>(method: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self::new(BindingKind::RedisCall, method, arity, handler)
    }

    /// A REST GET route at `path`.
    pub fn get<F>(method: impl Into<String>, path: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let mut binding = Self::new(BindingKind::Get, method, arity, handler);
        binding.path = Some(path.into());
        binding
    }

    /// A REST POST route at `path`.
    pub fn post<F>(method: impl Into<String>, path: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let mut binding = Self::new(BindingKind::Post, method, arity, handler);
        binding.path = Some(path.into());
        binding
    }

    /// Expose the method under a different event name.
    pub fn remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    /// Register a resolver for positional parameter `index`.
    ///
    /// A later registration for the same index replaces the earlier one.
    pub fn inject<F>(mut self, index: usize, resolver: F) -> Self
    where
        F: Fn(&[Value], &Connection) -> Arg + Send + Sync + 'static,
    {
        self.injected.insert(index, Arc::new(resolver));
        self
    }

    /// Append a middleware; middlewares run in the order they were added.
    pub fn middleware<F>(mut self, middleware: F) -> Self
    where
        F: Fn(&mut Vec<Value>, &Connection, &mut Next) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware.
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// The method's own name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The event name clients use: the remote name if set, otherwise the method name.
    pub fn event_name(&self) -> &str {
        self.remote_name.as_deref().unwrap_or(&self.method)
    }

    /// Route path for REST bindings.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn injected(&self, index: usize) -> Option<&Resolver> {
        self.injected.get(&index)
    }

    pub(crate) fn injected_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.injected.keys().copied()
    }

    pub fn middlewares(&self) -> &[Middleware] {
        &self.middlewares
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for MethodBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBinding")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("event_name", &self.event_name())
            .field("path", &self.path)
            .field("arity", &self.arity)
            .field("injected", &self.injected.keys().collect::<Vec<_>>())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// Everything a provider module exposes.
#[derive(Clone)]
pub struct ProviderDescriptor {
    name: String,
    namespace: Option<String>,
    bindings: Vec<MethodBinding>,
    on_init: Vec<InitHook>,
    after_start: Vec<AfterStartHook>,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            bindings: Vec::new(),
            on_init: Vec::new(),
            after_start: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn bind(mut self, binding: MethodBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Run `hook` once at node bootstrap, before the bus starts.
    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_init.push(Arc::new(hook));
        self
    }

    /// Run `hook` once the bus is running.
    pub fn after_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Fleet) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.after_start.push(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptor's namespace, defaulting to [`DEFAULT_NAMESPACE`].
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn bindings(&self) -> &[MethodBinding] {
        &self.bindings
    }

    pub fn init_hooks(&self) -> &[InitHook] {
        &self.on_init
    }

    pub fn after_start_hooks(&self) -> &[AfterStartHook] {
        &self.after_start
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("namespace", &self.namespace_or_default())
            .field("bindings", &self.bindings)
            .field("on_init", &self.on_init.len())
            .field("after_start", &self.after_start.len())
            .finish()
    }
}

/// Stock resolvers for framework-injected parameters.
pub mod inject {
    use serde_json::Value;

    use crate::rpc::args::Arg;
    use crate::rpc::connection::Connection;

    /// Resolves to the connection the event arrived on.
    pub fn connection() -> impl Fn(&[Value], &Connection) -> Arg + Send + Sync + 'static {
        |_data: &[Value], conn: &Connection| Arg::Connection(conn.clone())
    }

    /// Resolves to the connection's handshake metadata.
    pub fn handshake() -> impl Fn(&[Value], &Connection) -> Arg + Send + Sync + 'static {
        |_data: &[Value], conn: &Connection| Arg::Handshake(conn.handshake().clone())
    }
}
