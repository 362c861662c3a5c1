//! Per-connection I/O pipeline
//!
//! Each accepted socket is split into a read task and a writer task. The
//! read task delivers inbound chunks to the application one at a time,
//! awaiting each callback before the next read, which gives every client
//! serialized, wire-ordered `on_message` delivery for free. The writer
//! drains the client's outbound queue until the queue closes or a write
//! fails.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::error::ChatError;
use crate::transport::listener::{TcpTransport, TransportEvents};
use crate::transport::MAX_CHUNK_BYTES;
use crate::ClientId;

/// Run one connection to completion. Spawned by the accept loop.
pub(crate) async fn run(
    transport: Arc<TcpTransport>,
    client_id: ClientId,
    stream: TcpStream,
    peer: SocketAddr,
    outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    close: Arc<Notify>,
    handler: Arc<dyn TransportEvents>,
) {
    let (mut reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_loop(client_id, writer, outbound_rx, Arc::clone(&close)));

    handler.on_connect(client_id, peer).await;

    let mut buf = [0u8; MAX_CHUNK_BYTES];
    loop {
        tokio::select! {
            // Checked first so a close requested during the connect
            // callback wins over any bytes the peer raced in.
            biased;
            _ = close.notified() => {
                debug!("connection {} closed by server", client_id);
                break;
            }
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("connection {} closed by peer", client_id);
                    break;
                }
                Ok(n) => {
                    handler.on_message(client_id, Bytes::copy_from_slice(&buf[..n])).await;
                }
                Err(e) => {
                    debug!("connection {}: {}", client_id, ChatError::read(e.to_string()));
                    break;
                }
            }
        }
    }

    // Removing the client drops the queue's sender, which lets the writer
    // drain whatever is already queued and exit.
    transport.finish_client(client_id, handler.as_ref()).await;
    let _ = writer_task.await;
    transport.release_task(client_id).await;
}

async fn write_loop(
    client_id: ClientId,
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    close: Arc<Notify>,
) {
    while let Some(chunk) = outbound_rx.recv().await {
        if let Err(e) = writer.write_all(&chunk).await {
            debug!("connection {}: {}", client_id, ChatError::write(e.to_string()));
            close.notify_one();
            break;
        }
    }
}
