//! Server composition root
//!
//! Owns the transport, the dispatcher with its shared components, and the
//! periodic idle sweep. The lifetime of a `ChatServer` encloses the whole
//! accept loop; everything the callbacks touch hangs off the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::error::Result;
use crate::server::dispatcher::Dispatcher;
use crate::server::policy::PolicyConfig;
use crate::store::StoreConfig;
use crate::transport::{TcpTransport, TransportEvents};
use crate::DEFAULT_PORT;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on; `0` picks an ephemeral port
    pub port: u16,
    /// Rate-limit and moderation settings
    pub policy: PolicyConfig,
    /// Message cache and log settings
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            // The server runs a more generous idle timeout than the policy
            // default.
            policy: PolicyConfig {
                connection_timeout_seconds: 300,
                ..PolicyConfig::default()
            },
            store: StoreConfig::default(),
        }
    }
}

/// Multi-room TCP chat server
pub struct ChatServer {
    config: ServerConfig,
    transport: Arc<TcpTransport>,
    dispatcher: Arc<Dispatcher>,
    sweep_task: Option<JoinHandle<()>>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let transport = Arc::new(TcpTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&transport),
            config.policy.clone(),
            config.store.clone(),
        ));

        Self {
            config,
            transport,
            dispatcher,
            sweep_task: None,
        }
    }

    /// Bind the listener, wire the dispatcher into the transport, and spawn
    /// the idle sweep. Fails only on bind/listen errors.
    pub async fn start(&mut self) -> Result<()> {
        let handler: Arc<dyn TransportEvents> = self.dispatcher.clone();
        Arc::clone(&self.transport).start(self.config.port, handler).await?;

        let transport = Arc::clone(&self.transport);
        let dispatcher = Arc::clone(&self.dispatcher);
        self.sweep_task = Some(tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let ids = dispatcher.registry().ids().await;
                for id in dispatcher.policy().check_timeouts(&ids).await {
                    info!("client {} timed out", id);
                    transport.disconnect(id).await;
                }
            }
        }));

        Ok(())
    }

    /// Address the server is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// The dispatcher and the shared components behind it.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop accepting, close every client, and flush the message log.
    /// Idempotent and best-effort.
    pub async fn stop(&mut self) {
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
        self.transport.stop().await;
        self.dispatcher.store().flush().await;
        info!("server stopped");
    }
}
