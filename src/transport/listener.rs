//! Listening socket, client table, and outbound fan-out

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::transport::connection;
use crate::ClientId;

/// Application hooks for transport lifecycle events.
///
/// For a given client, `on_connect` strictly precedes every `on_message`,
/// `on_message` calls are serialized in wire order, and `on_disconnect`
/// fires exactly once after all of them, however the connection ended.
#[async_trait]
pub trait TransportEvents: Send + Sync + 'static {
    async fn on_connect(&self, client_id: ClientId, addr: SocketAddr);
    async fn on_message(&self, client_id: ClientId, data: Bytes);
    async fn on_disconnect(&self, client_id: ClientId);
}

/// Per-client bookkeeping held by the transport.
pub(crate) struct ClientHandle {
    pub(crate) addr: SocketAddr,
    /// Outbound buffer queue, drained by the client's writer task
    pub(crate) outbound: mpsc::UnboundedSender<Bytes>,
    /// Close signal; the read task is the only waiter
    pub(crate) close: Arc<Notify>,
}

/// TCP transport: accept loop plus one read task and one writer task per
/// connection.
pub struct TcpTransport {
    /// Connected clients by ID
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    /// Connection task handles, joined on stop
    tasks: Mutex<HashMap<ClientId, JoinHandle<()>>>,
    next_client_id: AtomicU32,
    running: AtomicBool,
    /// Wakes the accept loop on shutdown
    shutdown: Notify,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            next_client_id: AtomicU32::new(1),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            accept_task: Mutex::new(None),
            local_addr: OnceLock::new(),
        }
    }

    /// Bind the listening socket and begin accepting connections.
    ///
    /// Bind and listen failures are fatal and returned to the caller;
    /// individual accept failures are logged and the loop continues.
    pub async fn start(self: Arc<Self>, port: u16, handler: Arc<dyn TransportEvents>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ChatError::listen("transport is already running"));
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let std_listener =
            std::net::TcpListener::bind(addr).map_err(|e| ChatError::bind(e.to_string()))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ChatError::listen(e.to_string()))?;
        let listener =
            TcpListener::from_std(std_listener).map_err(|e| ChatError::listen(e.to_string()))?;

        let local = listener.local_addr().map_err(|e| ChatError::listen(e.to_string()))?;
        let _ = self.local_addr.set(local);
        self.running.store(true, Ordering::SeqCst);
        info!("listening on {}", local);

        let transport = Arc::clone(&self);
        let accept = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = transport.shutdown.notified() => break,
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            accept_client(Arc::clone(&transport), stream, peer, Arc::clone(&handler)).await;
                        }
                        Err(e) => {
                            warn!("{}", ChatError::accept(e.to_string()));
                        }
                    }
                }
            }
            debug!("accept loop stopped");
        });
        *self.accept_task.lock().await = Some(accept);
        Ok(())
    }

    /// Stop accepting, close every peer socket, and wait for in-flight I/O
    /// to quiesce. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shutdown.notify_one();
        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }

        {
            let clients = self.clients.read().await;
            for handle in clients.values() {
                handle.close.notify_one();
            }
        }

        let tasks: Vec<JoinHandle<()>> =
            self.tasks.lock().await.drain().map(|(_, task)| task).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("transport stopped");
    }

    /// Queue an outbound buffer for a client. Returns whether the client
    /// was known; a dead writer additionally triggers the client's close.
    pub async fn send(&self, client_id: ClientId, data: Bytes) -> bool {
        let clients = self.clients.read().await;
        match clients.get(&client_id) {
            Some(handle) => {
                if handle.outbound.send(data).is_err() {
                    handle.close.notify_one();
                }
                true
            }
            None => false,
        }
    }

    /// Fan an outbound buffer to every connected client except `exclude`.
    pub async fn broadcast(&self, data: Bytes, exclude: Option<ClientId>) {
        let clients = self.clients.read().await;
        for (id, handle) in clients.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if handle.outbound.send(data.clone()).is_err() {
                handle.close.notify_one();
            }
        }
    }

    /// Ask a client's connection to close. The disconnect callback fires
    /// from the connection task, exactly once.
    pub async fn disconnect(&self, client_id: ClientId) {
        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(&client_id) {
            handle.close.notify_one();
        }
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of currently connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Remove the client from the table and fire `on_disconnect` if this
    /// call was the one that removed it. Exactly-once is guaranteed by the
    /// single winning removal.
    pub(crate) async fn finish_client(&self, client_id: ClientId, handler: &dyn TransportEvents) {
        let removed = { self.clients.write().await.remove(&client_id) };
        if let Some(handle) = removed {
            debug!("connection {} from {} removed", client_id, handle.addr);
            handler.on_disconnect(client_id).await;
        }
    }

    /// Drop the finished connection task's handle.
    pub(crate) async fn release_task(&self, client_id: ClientId) {
        self.tasks.lock().await.remove(&client_id);
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Register a freshly accepted socket and spawn its connection task.
async fn accept_client(
    transport: Arc<TcpTransport>,
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn TransportEvents>,
) {
    let client_id = transport.next_client_id.fetch_add(1, Ordering::SeqCst);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let close = Arc::new(Notify::new());

    {
        let mut clients = transport.clients.write().await;
        clients.insert(
            client_id,
            ClientHandle {
                addr: peer,
                outbound: outbound_tx,
                close: Arc::clone(&close),
            },
        );
    }

    debug!("accepted connection {} from {}", client_id, peer);

    let task = tokio::spawn(connection::run(
        Arc::clone(&transport),
        client_id,
        stream,
        peer,
        outbound_rx,
        close,
        handler,
    ));
    transport.tasks.lock().await.insert(client_id, task);
}
