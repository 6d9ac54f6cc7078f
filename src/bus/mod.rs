//! Fleet bus — one shared pub/sub medium for every instance of every service.
//!
//! Each instance subscribes to two channels: the global channel (fleet-wide
//! announcements, broadcasts and call replies) and its own service channel
//! (messages and calls addressed to its service). Every replica of a service
//! sees every addressed message; the claim protocol picks the one that acts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Bus (per instance)                    │
//! │  message / call / broadcast          start() → BusHandle     │
//! └─────────────────────────────────────────────────────────────┘
//!      │                │                  │                │
//!      ▼                ▼                  ▼                ▼
//! ┌──────────┐  ┌───────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ Envelope │  │ServiceRegistry│  │ClaimCoord.   │  │ PendingCalls │
//! │  codec   │  │  heartbeats   │  │ SET NX / DEL │  │ correlation  │
//! └──────────┘  └───────────────┘  └──────────────┘  └──────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                KeyValueBus (store module)                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let store = Arc::new(InMemoryStore::new());
//! let dispatcher = Arc::new(RpcDispatcher::bind(&descriptors)?);
//! let bus = Arc::new(Bus::new(store, "orders", dispatcher, BusOptions::default()));
//! let handle = bus.start()?;
//!
//! bus.message("billing", "billing::charge", json!([order_id, 42]))?;
//! let total = bus.call("billing", "billing::total", json!([order_id]))?;
//!
//! let stats = handle.shutdown();
//! ```

mod bus;
mod calls;
mod claim;
mod envelope;
mod error;
mod registry;

pub use bus::{Bus, BusHandle, BusOptions, BusStats, Fleet, Handled};
pub use calls::{PendingCall, PendingCalls};
pub use claim::{ClaimCoordinator, ClaimGuard, ClaimOutcome, ClaimStats};
pub use envelope::{CallReply, DecodeError, Envelope, EnvelopeKind};
pub use error::{BusError, CallError};
pub use registry::{
    HeartbeatHandle, HeartbeatRecord, MetricProvider, MetricValue, Metrics, ServiceInstance,
    ServiceRegistry,
};

/// Channel every instance subscribes to.
pub const GLOBAL_CHANNEL: &str = "nj_bus";

/// Separator for channel names, heartbeat keys and dispatch keys.
pub const KEY_DELIMITER: &str = "::";

/// First segment of every heartbeat key.
pub const HEARTBEAT_PREFIX: &str = "service";

/// Channel carrying messages addressed to `service`.
pub fn service_channel(service: &str) -> String {
    format!("{GLOBAL_CHANNEL}{KEY_DELIMITER}{service}")
}

/// Heartbeat key for one instance of `service`.
pub fn heartbeat_key(service: &str, instance: &str) -> String {
    format!("{HEARTBEAT_PREFIX}{KEY_DELIMITER}{service}{KEY_DELIMITER}{instance}")
}
