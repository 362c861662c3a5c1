//! Message dispatcher
//!
//! Entry point for every transport event. Owns the high-level protocol:
//! admission control on connect, name registration, command execution,
//! room fan-out, and the disconnect bookkeeping. The dispatcher holds no
//! lock of its own; per-client serialization comes from the transport's
//! read tasks and shared state is serialized by each component's lock.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use crate::error::ChatError;
use crate::protocol::{self, Command, ParseError};
use crate::server::policy::{ConnectionPolicy, PolicyConfig};
use crate::server::registry::ClientRegistry;
use crate::server::room_manager::{RoomManager, GENERAL_ROOM};
use crate::store::{ChatMessage, MessageStore, StoreConfig};
use crate::transport::{TcpTransport, TransportEvents};
use crate::ClientId;

const WELCOME: &str =
    "Welcome to the chat server! You are in #general.\nType #help for available commands.";

const HELP: &str = "Available commands:\n\
  #rooms     - List all chat rooms\n\
  #join <r>  - Join room <r>\n\
  #create <r>- Create new room\n\
  #leave     - Leave to general\n\
  #online    - List online users\n\
  #whisper <user> <msg> - Private message\n\
  #history [n] - Show last n messages\n\
  #exit      - Disconnect";

/// Protocol dispatcher wired between the transport and the shared state.
pub struct Dispatcher {
    transport: Arc<TcpTransport>,
    registry: ClientRegistry,
    rooms: RoomManager,
    policy: ConnectionPolicy,
    store: MessageStore,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<TcpTransport>,
        policy_config: PolicyConfig,
        store_config: StoreConfig,
    ) -> Self {
        Self {
            transport,
            registry: ClientRegistry::new(),
            rooms: RoomManager::new(),
            policy: ConnectionPolicy::new(policy_config),
            store: MessageStore::new(store_config),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Send one newline-terminated reply; empty replies are suppressed.
    async fn send_line(&self, client_id: ClientId, line: &str) {
        if line.is_empty() {
            return;
        }
        let mut out = line.to_string();
        if !out.ends_with('\n') {
            out.push('\n');
        }
        self.transport.send(client_id, Bytes::from(out)).await;
    }

    /// Reply with the client-facing text for a protocol error.
    async fn send_error(&self, client_id: ClientId, err: ChatError) {
        let reply = match &err {
            ChatError::Muted => "You are muted.".to_string(),
            ChatError::RateLimited => {
                "You are sending too many messages. Please slow down.".to_string()
            }
            ChatError::UnknownCommand(_) => {
                "Unknown command. Type #help for available commands.".to_string()
            }
            ChatError::UserNotFound(name) => format!("User not found: {}", name),
            other => other.to_string(),
        };
        self.send_line(client_id, &reply).await;
    }

    /// Send `line` to every member of `room` except `exclude`.
    async fn notify_room(&self, room: &str, line: &str, exclude: Option<ClientId>) {
        for member in self.rooms.members(room).await {
            if Some(member) == exclude {
                continue;
            }
            self.send_line(member, line).await;
        }
    }

    async fn handle_connect(&self, client_id: ClientId, peer: SocketAddr) {
        let ip = peer.ip().to_string();
        if !self.policy.allow_connection(&ip).await {
            info!("connection rejected (rate limit): {}", ip);
            self.transport.disconnect(client_id).await;
            return;
        }

        self.policy.on_connect();
        self.registry.register(client_id, peer.to_string(), ip).await;
        self.policy.update_activity(client_id).await;

        info!("client {} connected from {}", client_id, peer);

        // Queued before the room join so it precedes any broadcast.
        self.send_line(client_id, WELCOME).await;
        let _ = self.rooms.join_room(GENERAL_ROOM, client_id, "").await;
    }

    async fn handle_chunk(&self, client_id: ClientId, data: Bytes) {
        let Some(text) = protocol::trim_chunk(&data) else {
            return;
        };

        if self.policy.is_muted(client_id).await {
            self.send_error(client_id, ChatError::Muted).await;
            return;
        }
        if !self.policy.allow_message(client_id).await {
            self.send_error(client_id, ChatError::RateLimited).await;
            return;
        }
        self.policy.record_message(client_id).await;
        self.registry.record_inbound(client_id).await;

        if self.registry.is_anonymous(client_id).await && !text.starts_with('#') {
            self.register_name(client_id, &text).await;
            return;
        }

        if text.starts_with('#') {
            match protocol::parse(&text) {
                Ok(command) => self.execute(client_id, command).await,
                Err(ParseError::Usage(usage)) => self.send_line(client_id, usage).await,
                Err(ParseError::Unknown(word)) => {
                    self.send_error(client_id, ChatError::unknown_command(word)).await;
                }
            }
            return;
        }

        self.broadcast_chat(client_id, &text).await;
    }

    async fn handle_disconnect(&self, client_id: ClientId) {
        // Clients refused at admission were never registered; nothing to
        // announce and no connection slot to release.
        let Some(info) = self.registry.remove(client_id).await else {
            return;
        };

        let name = info.display_name();
        let room = self.rooms.client_room(client_id).await;
        self.rooms.leave_room(client_id).await;
        self.policy.on_disconnect();
        self.policy.forget(client_id).await;

        let farewell = format!("{} has left the chat", name);
        self.notify_room(&room, &farewell, None).await;

        info!("client {} ({}) disconnected", client_id, name);
    }

    /// First non-command chunk from an anonymous client becomes its name.
    async fn register_name(&self, client_id: ClientId, name: &str) {
        self.registry.set_name(client_id, name).await;

        let room = self.rooms.client_room(client_id).await;
        let announcement = format!("{} has joined #{}", name, room);
        self.notify_room(&room, &announcement, Some(client_id)).await;

        info!("client {} registered as {}", client_id, name);
    }

    async fn execute(&self, client_id: ClientId, command: Command) {
        match command {
            Command::Help => self.send_line(client_id, HELP).await,
            Command::Rooms => self.cmd_rooms(client_id).await,
            Command::Join(room) => self.cmd_join(client_id, &room).await,
            Command::Create(room) => self.cmd_create(client_id, &room).await,
            Command::Leave => self.cmd_leave(client_id).await,
            Command::Online => self.cmd_online(client_id).await,
            Command::Whisper { target, text } => self.cmd_whisper(client_id, &target, &text).await,
            Command::History(count) => self.cmd_history(client_id, count).await,
            Command::Kick(target) => self.cmd_kick(client_id, &target).await,
            Command::Ban(target) => self.cmd_ban(client_id, &target).await,
            Command::Mute { target, seconds } => self.cmd_mute(client_id, &target, seconds).await,
            Command::Exit => self.transport.disconnect(client_id).await,
        }
    }

    async fn cmd_rooms(&self, client_id: ClientId) {
        let mut list = String::from("Available rooms:\n");
        for room in self.rooms.list_rooms().await {
            let count = self.rooms.members(&room).await.len();
            list.push_str(&format!("  #{} ({} users)\n", room, count));
        }
        self.send_line(client_id, &list).await;
    }

    async fn cmd_join(&self, client_id: ClientId, room: &str) {
        let name = self.registry.display_name(client_id).await;
        let old_room = self.rooms.client_room(client_id).await;

        if old_room == room {
            self.send_line(client_id, &format!("You are already in #{}", room)).await;
            return;
        }

        match self.rooms.join_room(room, client_id, "").await {
            Ok(()) => {
                self.notify_room(&old_room, &format!("{} left #{}", name, old_room), None).await;
                self.notify_room(room, &format!("{} joined #{}", name, room), Some(client_id))
                    .await;
                self.send_line(client_id, &format!("Joined #{}", room)).await;
            }
            Err(_) => {
                self.send_line(client_id, "Failed to join room. Does it exist?").await;
            }
        }
    }

    async fn cmd_create(&self, client_id: ClientId, room: &str) {
        match self.rooms.create_room(room, client_id, false, "").await {
            Ok(()) => {
                let _ = self.rooms.join_room(room, client_id, "").await;
                self.send_line(client_id, &format!("Created and joined #{}", room)).await;

                let name = self.registry.display_name(client_id).await;
                info!("room created: #{} by {}", room, name);
            }
            Err(_) => {
                self.send_line(client_id, "Failed to create room. Does it already exist?").await;
            }
        }
    }

    async fn cmd_leave(&self, client_id: ClientId) {
        let current = self.rooms.client_room(client_id).await;
        if current == GENERAL_ROOM {
            self.send_line(client_id, "You are already in #general").await;
            return;
        }

        let _ = self.rooms.join_room(GENERAL_ROOM, client_id, "").await;
        self.send_line(client_id, &format!("You left #{} and joined #general", current)).await;
    }

    async fn cmd_online(&self, client_id: ClientId) {
        let clients = self.registry.snapshot().await;
        let mut list = format!("Online users ({}):\n", clients.len());
        for (id, name) in clients {
            let room = self.rooms.client_room(id).await;
            list.push_str(&format!("  {} (#{})\n", name, room));
        }
        self.send_line(client_id, &list).await;
    }

    async fn cmd_whisper(&self, client_id: ClientId, target: &str, text: &str) {
        let Some(target_id) = self.registry.find_by_name(target).await else {
            self.send_error(client_id, ChatError::user_not_found(target)).await;
            return;
        };

        let name = self.registry.display_name(client_id).await;
        self.send_line(target_id, &format!("[Whisper from {}]:{}", name, text)).await;
        self.send_line(client_id, &format!("[Whisper to {}]:{}", target, text)).await;
    }

    async fn cmd_history(&self, client_id: ClientId, count: usize) {
        let room = self.rooms.client_room(client_id).await;
        let messages = self.store.get_recent(&room, count).await;

        let mut reply = format!("Last {} messages in #{}:\n", messages.len(), room);
        for message in messages {
            reply.push_str(&format!("  {}\n", message.to_line()));
        }
        self.send_line(client_id, &reply).await;
    }

    async fn cmd_kick(&self, client_id: ClientId, target: &str) {
        let Some(target_id) = self.registry.find_by_name(target).await else {
            self.send_error(client_id, ChatError::user_not_found(target)).await;
            return;
        };

        let name = self.registry.display_name(client_id).await;
        self.send_line(target_id, &format!("You have been kicked by {}", name)).await;
        self.transport.disconnect(target_id).await;
        self.send_line(client_id, &format!("Kicked {}", target)).await;

        info!("{} kicked {}", name, target);
    }

    async fn cmd_ban(&self, client_id: ClientId, target: &str) {
        let Some(target_id) = self.registry.find_by_name(target).await else {
            self.send_error(client_id, ChatError::user_not_found(target)).await;
            return;
        };

        if let Some(ip) = self.registry.ip_of(target_id).await {
            self.policy.ban(&ip).await;
        }

        let name = self.registry.display_name(client_id).await;
        self.send_line(target_id, &format!("You have been banned by {}", name)).await;
        self.transport.disconnect(target_id).await;
        self.send_line(client_id, &format!("Banned IP for {}", target)).await;

        info!("{} banned {}", name, target);
    }

    async fn cmd_mute(&self, client_id: ClientId, target: &str, seconds: u64) {
        let Some(target_id) = self.registry.find_by_name(target).await else {
            self.send_error(client_id, ChatError::user_not_found(target)).await;
            return;
        };

        self.policy.mute(target_id, seconds).await;

        let name = self.registry.display_name(client_id).await;
        self.send_line(target_id, &format!("You have been muted for {} seconds", seconds)).await;
        self.send_line(client_id, &format!("Muted {} for {} seconds", target, seconds)).await;

        info!("{} muted {}", name, target);
    }

    /// Store a chat message and fan it out to the sender's roommates.
    async fn broadcast_chat(&self, client_id: ClientId, text: &str) {
        let name = self.registry.display_name(client_id).await;
        let room = self.rooms.client_room(client_id).await;

        let message =
            ChatMessage::new(client_id, name.clone(), room.clone(), text.to_string());
        self.store.store(message).await;

        let formatted = format!("{}: {}", name, text);
        self.notify_room(&room, &formatted, Some(client_id)).await;

        info!("[#{}] {}: {}", room, name, text);
    }
}

#[async_trait]
impl TransportEvents for Dispatcher {
    async fn on_connect(&self, client_id: ClientId, addr: SocketAddr) {
        self.handle_connect(client_id, addr).await;
    }

    async fn on_message(&self, client_id: ClientId, data: Bytes) {
        self.handle_chunk(client_id, data).await;
    }

    async fn on_disconnect(&self, client_id: ClientId) {
        self.handle_disconnect(client_id).await;
    }
}
