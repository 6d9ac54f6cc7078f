//! Middleware chain with continue / short-circuit control.
//!
//! Middlewares run strictly in registration order before the handler. Each
//! one gets the pending argument list, the connection, and a [`Next`]
//! control. A middleware that does nothing lets the chain proceed;
//! `continue_with` swaps the argument list; `short_circuit` stops the chain,
//! skips the handler and (for calls) supplies the reply.

use std::sync::Arc;

use serde_json::Value;

use super::connection::Connection;
use super::error::HandlerError;

/// A middleware function.
pub type Middleware =
    Arc<dyn Fn(&mut Vec<Value>, &Connection, &mut Next) -> Result<(), HandlerError> + Send + Sync>;

/// Control object handed to each middleware.
#[derive(Debug, Default)]
pub struct Next {
    replacement: Option<Vec<Value>>,
    stopped: Option<Option<Value>>,
}

impl Next {
    /// Proceed to the next middleware, optionally replacing the argument list.
    pub fn continue_with(&mut self, args: Option<Vec<Value>>) {
        if self.stopped.is_some() {
            return;
        }
        if let Some(args) = args {
            self.replacement = Some(args);
        }
    }

    /// Abort the chain. For calls, `value` becomes the reply.
    ///
    /// Only the first call counts.
    pub fn short_circuit(&mut self, value: Option<Value>) {
        if self.stopped.is_none() {
            self.stopped = Some(value);
        }
    }

    pub fn is_short_circuited(&self) -> bool {
        self.stopped.is_some()
    }
}

/// How a chain run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// Every middleware let the event through.
    Proceed,
    /// A middleware stopped the chain with this value.
    ShortCircuit(Option<Value>),
}

/// Run `middlewares` over `args` in order.
pub fn run_chain(
    middlewares: &[Middleware],
    args: &mut Vec<Value>,
    conn: &Connection,
) -> Result<ChainOutcome, HandlerError> {
    for middleware in middlewares {
        let mut next = Next::default();
        middleware(&mut *args, conn, &mut next)?;
        if let Some(value) = next.stopped {
            return Ok(ChainOutcome::ShortCircuit(value));
        }
        if let Some(replacement) = next.replacement {
            *args = replacement;
        }
    }
    Ok(ChainOutcome::Proceed)
}

/// Wrap a closure as a [`Middleware`].
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(&mut Vec<Value>, &Connection, &mut Next) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}
