//! rpc — binds provider methods to transport events.
//!
//! Providers describe what they expose with a [`ProviderDescriptor`]; the
//! [`RpcDispatcher`] turns those descriptors into lookup tables once, at
//! startup, and routes `(event, data, connection)` triples to handlers
//! through each binding's middleware chain.
//!
//! ## Quick Start
//!
//! ```ignore
//! use netjam_rust::rpc::{inject, Connection, MethodBinding, ProviderDescriptor, RpcDispatcher};
//! use serde_json::json;
//!
//! let rooms = ProviderDescriptor::new("rooms")
//!     .namespace("rooms")
//!     .bind(
//!         MethodBinding::remote_call("join", 3, |args| {
//!             let room: String = args.get(0)?;
//!             let conn = args.connection(1)?;
//!             let nick: String = args.get(2)?;
//!             Ok(json!({ "room": room, "client": conn.id(), "nick": nick }))
//!         })
//!         .inject(1, inject::connection())
//!         .middleware(|_args, conn, next| {
//!             if conn.handshake().get("authorization").is_none() {
//!                 next.short_circuit(Some(json!({ "error": "unauthorized" })));
//!             }
//!             Ok(())
//!         }),
//!     );
//!
//! let dispatcher = RpcDispatcher::bind(&[rooms])?;
//! let reply = dispatcher.dispatch_call("rooms::join", json!(["lobby", "ann"]), &Connection::socket("s1"))?;
//! ```

mod args;
mod connection;
mod descriptor;
mod dispatcher;
mod error;
mod handshake;
mod middleware;

pub use args::{positional, Arg, Args};
pub use connection::{Connection, Origin};
pub use descriptor::{
    inject, AfterStartHook, BindingKind, Handler, InitHook, MethodBinding, ProviderDescriptor,
    Resolver, DEFAULT_NAMESPACE,
};
pub use dispatcher::{event_key, Dispatch, RestRoute, RpcDispatcher, Table};
pub use error::{BindError, HandlerError};
pub use handshake::{Handshake, CORRELATION_KEY, MESSAGE_ID_KEY, SENDER_KEY};
pub use middleware::{middleware, run_chain, ChainOutcome, Middleware, Next};

// HTTP transport (requires "http" feature)
#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::{router, serve};
