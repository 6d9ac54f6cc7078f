//! Node — composition root for one service instance.
//!
//! Builds the dispatch tables once from the provider descriptors, creates the
//! bus around them, and runs provider hooks around startup:
//!
//! ```text
//!   Node::new        validate config, bind descriptors (duplicate bindings fail here)
//!   Node::start      on_init hooks → bus.start() → after_start hooks
//!   shutdown         heartbeat off, unsubscribe, disconnect announcement
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let config = NodeConfig::load(Some(Path::new("netjam.toml")))?;
//! netjam_rust::logging::init(&config.logging.filter);
//!
//! let node = Node::new(config, Arc::new(InMemoryStore::new()), vec![chat::provider()])?;
//! let running = node.start()?;
//! // ...
//! let stats = running.shutdown();
//! ```

use std::sync::Arc;

use tracing::{error, info};

use crate::bus::{Bus, BusError, BusHandle, BusStats, Fleet};
use crate::config::{ConfigError, NodeConfig};
use crate::rpc::{BindError, HandlerError, ProviderDescriptor, RpcDispatcher};
use crate::store::KeyValueBus;

/// Errors that stop a node from starting.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("provider {provider} failed to initialise: {source}")]
    Init {
        provider: String,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// A configured, not yet started instance.
pub struct Node<S> {
    config: NodeConfig,
    store: Arc<S>,
    descriptors: Vec<ProviderDescriptor>,
    dispatcher: Arc<RpcDispatcher>,
}

impl<S: KeyValueBus + 'static> Node<S> {
    /// Validate `config` and bind every descriptor.
    pub fn new(
        config: NodeConfig,
        store: Arc<S>,
        descriptors: Vec<ProviderDescriptor>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let dispatcher = Arc::new(RpcDispatcher::bind(&descriptors)?);
        Ok(Self {
            config,
            store,
            descriptors,
            dispatcher,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<RpcDispatcher> {
        &self.dispatcher
    }

    /// Run init hooks, start the bus, then run after-start hooks.
    ///
    /// A failing after-start hook shuts the bus down again before returning.
    pub fn start(self) -> Result<RunningNode<S>, NodeError> {
        for descriptor in &self.descriptors {
            for hook in descriptor.init_hooks() {
                hook().map_err(|source| NodeError::Init {
                    provider: descriptor.name().to_string(),
                    source,
                })?;
            }
        }

        let bus = Arc::new(Bus::new(
            self.store,
            &self.config.service_name,
            Arc::clone(&self.dispatcher),
            self.config.bus_options(),
        ));
        let handle = bus.start()?;

        for descriptor in &self.descriptors {
            for hook in descriptor.after_start_hooks() {
                if let Err(source) = hook(bus.as_ref() as &dyn Fleet) {
                    error!(provider = descriptor.name(), error = %source, "after-start hook failed");
                    handle.shutdown();
                    return Err(NodeError::Init {
                        provider: descriptor.name().to_string(),
                        source,
                    });
                }
            }
        }

        info!(
            service = %bus.service_name(),
            instance = %bus.instance_id(),
            providers = self.descriptors.len(),
            "node started"
        );
        Ok(RunningNode {
            handle,
            dispatcher: self.dispatcher,
        })
    }
}

#[cfg(feature = "redis")]
impl Node<crate::store::RedisStore> {
    /// Connect to the Redis server named in `config.store.url`.
    pub fn connect(
        config: NodeConfig,
        descriptors: Vec<ProviderDescriptor>,
    ) -> Result<Self, NodeError> {
        let store = crate::store::RedisStore::open(&config.store.url).map_err(BusError::from)?;
        Self::new(config, Arc::new(store), descriptors)
    }
}

/// A started instance.
pub struct RunningNode<S: KeyValueBus + 'static> {
    handle: BusHandle<S>,
    dispatcher: Arc<RpcDispatcher>,
}

impl<S: KeyValueBus + 'static> RunningNode<S> {
    pub fn bus(&self) -> &Arc<Bus<S>> {
        self.handle.bus()
    }

    /// Dispatcher for socket/HTTP transports.
    pub fn dispatcher(&self) -> &Arc<RpcDispatcher> {
        &self.dispatcher
    }

    /// Stop the bus and return its final counters.
    pub fn shutdown(self) -> BusStats {
        self.handle.shutdown()
    }
}
