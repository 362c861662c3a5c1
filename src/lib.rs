//! Banter - Multi-Room TCP Chat Server
//!
//! This library provides a line-oriented chat server built on an
//! asynchronous accept loop, per-connection read/write pipelines, and a set
//! of shared components that route messages between clients grouped into
//! named rooms.
//!
//! ## Architecture
//!
//! - **Transport**: owns the listening socket and every peer socket,
//!   delivers inbound chunks and lifecycle events, accepts outbound buffers
//! - **Client Registry**: stable client IDs mapped to names, addresses, and
//!   activity counters
//! - **Room Manager**: named rooms, membership, ownership, topics, private
//!   rooms
//! - **Connection Policy**: connection/message rate limits, IP bans, mutes,
//!   idle-timeout detection
//! - **Message Store**: bounded per-room cache plus a rotated append-only
//!   daily log
//! - **Dispatcher**: the command grammar and the high-level protocol tying
//!   the above together
//!
//! ## Example
//!
//! ```rust,ignore
//! use banter::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> banter::Result<()> {
//!     let mut server = ChatServer::new(ServerConfig::default());
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;
pub mod protocol;
pub mod store;
pub mod transport;

// Server modules
pub mod server;

// Re-export error types
pub use error::{ChatError, Result};

// Re-export protocol types
pub use protocol::{Command, ParseError};

// Re-export transport types
pub use transport::{TcpTransport, TransportEvents, MAX_CHUNK_BYTES};

// Re-export server types
pub use server::{
    ChatServer, ClientRegistry, ConnectionPolicy, Dispatcher, MuteState, PolicyConfig,
    RoomManager, ServerConfig,
};

// Re-export store types
pub use store::{ChatMessage, MessageStore, StoreConfig};

use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identifier assigned to every accepted connection, monotonically
/// increasing from 1.
pub type ClientId = u32;

/// The administrator principal. Owns the default room and bypasses
/// ownership checks; never bound to a real connection.
pub const ADMIN_ID: ClientId = 0;

/// Port the server binds when none is given on the command line.
pub const DEFAULT_PORT: u16 = 8080;

/// Get current wall-clock timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
