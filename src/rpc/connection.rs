use std::sync::Arc;

use super::handshake::{Handshake, CORRELATION_KEY, MESSAGE_ID_KEY, SENDER_KEY};
use crate::bus::Envelope;

/// Which transport an event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Socket,
    Http,
    Bus,
}

#[derive(Debug)]
struct Inner {
    id: String,
    origin: Origin,
    handshake: Handshake,
}

/// Handle to the peer an inbound event came from.
///
/// Cheap to clone; injected into handlers that ask for it.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a connection handle.
    pub fn new(id: impl Into<String>, origin: Origin, handshake: Handshake) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                origin,
                handshake,
            }),
        }
    }

    /// A socket connection with an empty handshake.
    pub fn socket(id: impl Into<String>) -> Self {
        Self::new(id, Origin::Socket, Handshake::new())
    }

    /// The pseudo-connection for an event delivered over the bus.
    ///
    /// Its id is the sending instance; the envelope ids go in the handshake.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let mut handshake = Handshake::new()
            .with(SENDER_KEY, &envelope.sender_id)
            .with(MESSAGE_ID_KEY, &envelope.id);
        if let Some(correlation_id) = &envelope.correlation_id {
            handshake.set(CORRELATION_KEY, correlation_id);
        }
        Self::new(&envelope.sender_id, Origin::Bus, handshake)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn origin(&self) -> Origin {
        self.inner.origin
    }

    pub fn handshake(&self) -> &Handshake {
        &self.inner.handshake
    }

    /// True when both handles refer to the same connection.
    pub fn same(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
