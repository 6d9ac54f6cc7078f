pub mod bus;
pub mod config;
pub mod logging;
pub mod node;
pub mod rpc;
pub mod store;

pub use bus::{
    Bus, BusError, BusHandle, BusOptions, BusStats, CallError, CallReply, ClaimCoordinator,
    Envelope, EnvelopeKind, Fleet, HeartbeatRecord, MetricValue, Metrics, ServiceRegistry,
};
pub use config::{ConfigError, NodeConfig};
pub use node::{Node, NodeError, RunningNode};
pub use rpc::{
    inject, Args, BindError, Connection, Dispatch, HandlerError, Handshake, MethodBinding,
    ProviderDescriptor, RpcDispatcher,
};
pub use store::{InMemoryStore, KeyValueBus, StoreError};
#[cfg(feature = "redis")]
pub use store::RedisStore;
