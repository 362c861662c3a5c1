//! Room management for the chat server
//!
//! This module handles server-side room state, member tracking, and room
//! lifecycle. Rooms and the client-to-room index live under one lock so the
//! membership invariant (every tracked client is in exactly the room the
//! index names) holds atomically across every transition.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::sync::RwLock;

use crate::error::{ChatError, Result};
use crate::{ClientId, ADMIN_ID};

/// Name of the default room every client lands in. Created at startup,
/// owned by the administrator, undeletable.
pub const GENERAL_ROOM: &str = "general";

/// A chat room
#[derive(Debug)]
pub struct Room {
    /// Room name, unique across the server
    pub name: String,
    /// Free-text topic
    pub topic: String,
    /// Client that created the room (`ADMIN_ID` for `general`)
    pub owner_id: ClientId,
    /// Creation time
    pub created_at: Instant,
    /// Whether joining requires the password
    pub is_private: bool,
    /// Join password, compared only for private rooms
    pub password: String,
    /// Member client IDs
    members: HashSet<ClientId>,
}

impl Room {
    fn new(name: String, owner_id: ClientId) -> Self {
        Self {
            name,
            topic: String::new(),
            owner_id,
            created_at: Instant::now(),
            is_private: false,
            password: String::new(),
            members: HashSet::new(),
        }
    }
}

#[derive(Default)]
struct RoomState {
    rooms: HashMap<String, Room>,
    /// client_id -> room name
    client_rooms: HashMap<ClientId, String>,
}

/// Room manager for tracking all rooms and client memberships
pub struct RoomManager {
    state: RwLock<RoomState>,
}

impl RoomManager {
    /// Create a manager holding the default `general` room.
    pub fn new() -> Self {
        let mut general = Room::new(GENERAL_ROOM.to_string(), ADMIN_ID);
        general.topic = "Welcome to the chat server!".to_string();

        let mut state = RoomState::default();
        state.rooms.insert(GENERAL_ROOM.to_string(), general);

        Self {
            state: RwLock::new(state),
        }
    }

    /// Create a new room. Fails if the name is taken.
    pub async fn create_room(
        &self,
        name: &str,
        owner_id: ClientId,
        is_private: bool,
        password: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.rooms.contains_key(name) {
            return Err(ChatError::room_exists(name));
        }

        let mut room = Room::new(name.to_string(), owner_id);
        room.is_private = is_private;
        room.password = password.to_string();
        state.rooms.insert(name.to_string(), room);
        Ok(())
    }

    /// Delete a room, migrating every member into `general`.
    ///
    /// Only the owner or the administrator may delete; `general` itself is
    /// undeletable.
    pub async fn delete_room(&self, name: &str, requester_id: ClientId) -> Result<()> {
        let mut state = self.state.write().await;

        if name == GENERAL_ROOM {
            return Err(ChatError::permission_denied("the default room cannot be deleted"));
        }

        match state.rooms.get(name) {
            None => return Err(ChatError::room_missing(name)),
            Some(room) if room.owner_id != requester_id && requester_id != ADMIN_ID => {
                return Err(ChatError::permission_denied("only the owner may delete a room"));
            }
            Some(_) => {}
        }

        if let Some(room) = state.rooms.remove(name) {
            for client_id in room.members {
                state.client_rooms.insert(client_id, GENERAL_ROOM.to_string());
                if let Some(general) = state.rooms.get_mut(GENERAL_ROOM) {
                    general.members.insert(client_id);
                }
            }
        }
        Ok(())
    }

    /// Move a client into a room, leaving its previous room in the same
    /// critical section.
    ///
    /// Private rooms require `password` to equal the stored password, the
    /// empty string included; public rooms ignore it.
    pub async fn join_room(&self, name: &str, client_id: ClientId, password: &str) -> Result<()> {
        let mut state = self.state.write().await;

        {
            let room = state.rooms.get(name).ok_or_else(|| ChatError::room_missing(name))?;
            if room.is_private && room.password != password {
                return Err(ChatError::permission_denied("wrong room password"));
            }
        }

        // Leave current room first
        if let Some(current) = state.client_rooms.get(&client_id).cloned() {
            if let Some(old_room) = state.rooms.get_mut(&current) {
                old_room.members.remove(&client_id);
            }
        }

        if let Some(room) = state.rooms.get_mut(name) {
            room.members.insert(client_id);
        }
        state.client_rooms.insert(client_id, name.to_string());
        Ok(())
    }

    /// Remove a client from whatever room it is in.
    pub async fn leave_room(&self, client_id: ClientId) {
        let mut state = self.state.write().await;
        if let Some(current) = state.client_rooms.remove(&client_id) {
            if let Some(room) = state.rooms.get_mut(&current) {
                room.members.remove(&client_id);
            }
        }
    }

    /// Room the client is currently in, defaulting to `general` for
    /// untracked clients.
    pub async fn client_room(&self, client_id: ClientId) -> String {
        let state = self.state.read().await;
        state
            .client_rooms
            .get(&client_id)
            .cloned()
            .unwrap_or_else(|| GENERAL_ROOM.to_string())
    }

    /// Set a room's topic. Owner or administrator only.
    pub async fn set_topic(&self, name: &str, topic: &str, requester_id: ClientId) -> Result<()> {
        let mut state = self.state.write().await;
        let room = state.rooms.get_mut(name).ok_or_else(|| ChatError::room_missing(name))?;
        if room.owner_id != requester_id && requester_id != ADMIN_ID {
            return Err(ChatError::permission_denied("only the owner may set the topic"));
        }
        room.topic = topic.to_string();
        Ok(())
    }

    /// Names of all public rooms, sorted ascending.
    pub async fn list_rooms(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut list: Vec<String> = state
            .rooms
            .values()
            .filter(|room| !room.is_private)
            .map(|room| room.name.clone())
            .collect();
        list.sort();
        list
    }

    /// Member IDs of a room; empty if the room does not exist.
    pub async fn members(&self, name: &str) -> Vec<ClientId> {
        let state = self.state.read().await;
        state
            .rooms
            .get(name)
            .map(|room| room.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a room with this name exists.
    pub async fn room_exists(&self, name: &str) -> bool {
        let state = self.state.read().await;
        state.rooms.contains_key(name)
    }

    /// Multi-line human-readable description of a room.
    pub async fn room_info(&self, name: &str) -> Result<String> {
        let state = self.state.read().await;
        let room = state.rooms.get(name).ok_or_else(|| ChatError::room_missing(name))?;
        Ok(format!(
            "Room: #{}\nTopic: {}\nMembers: {}\nPrivate: {}",
            room.name,
            room.topic,
            room.members.len(),
            if room.is_private { "Yes" } else { "No" }
        ))
    }

    /// Members of the client's current room; falls back to `general`'s
    /// members for untracked clients.
    pub async fn roommates(&self, client_id: ClientId) -> Vec<ClientId> {
        let state = self.state.read().await;
        let room_name = state
            .client_rooms
            .get(&client_id)
            .map(String::as_str)
            .unwrap_or(GENERAL_ROOM);
        state
            .rooms
            .get(room_name)
            .map(|room| room.members.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
