//! Client registry
//!
//! Thread-safe mapping from stable client IDs to names, peer addresses, and
//! activity counters. Name resolution is a case-sensitive linear scan; the
//! registry is bounded by the connection cap, so the scan stays cheap.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::{current_timestamp, ClientId};

/// Display name of a client.
///
/// The placeholder `User#<id>` is synthesized for anonymous clients rather
/// than stored, so a user who literally registers the name `User#5` can
/// never be confused with the anonymous client 5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientName {
    /// No name chosen yet; displayed as `User#<id>`
    Anonymous,
    /// Self-declared display name
    Named(String),
}

/// Lifecycle state of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Admitted, no name chosen yet
    Connected,
    /// Name registered
    Authenticated,
}

/// Everything the registry tracks about one client.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Stable ID
    pub id: ClientId,
    /// Peer address as `host:port`
    pub addr: String,
    /// Peer host without the port, used for IP bans
    pub ip: String,
    /// Display name state
    pub name: ClientName,
    /// Lifecycle state
    pub state: ConnectionState,
    /// Connect time, epoch milliseconds
    pub connected_at: u64,
    /// Last inbound activity, epoch milliseconds
    pub last_activity: u64,
    /// Count of inbound messages
    pub message_count: u64,
}

impl ClientInfo {
    fn new(id: ClientId, addr: String, ip: String) -> Self {
        let now = current_timestamp();
        Self {
            id,
            addr,
            ip,
            name: ClientName::Anonymous,
            state: ConnectionState::Connected,
            connected_at: now,
            last_activity: now,
            message_count: 0,
        }
    }

    /// Resolved display name, synthesizing the placeholder when anonymous.
    pub fn display_name(&self) -> String {
        match &self.name {
            ClientName::Named(name) => name.clone(),
            ClientName::Anonymous => format!("User#{}", self.id),
        }
    }
}

/// Registry of connected clients
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientInfo>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Track a newly admitted client.
    pub async fn register(&self, id: ClientId, addr: String, ip: String) {
        let mut clients = self.clients.write().await;
        clients.insert(id, ClientInfo::new(id, addr, ip));
    }

    /// Record the client's self-declared name and mark it authenticated.
    ///
    /// Duplicate names are accepted; resolution returns the first match.
    pub async fn set_name(&self, id: ClientId, name: &str) {
        let mut clients = self.clients.write().await;
        if let Some(info) = clients.get_mut(&id) {
            info.name = ClientName::Named(name.to_string());
            info.state = ConnectionState::Authenticated;
        }
    }

    /// Resolved display name for a client, placeholder included.
    pub async fn display_name(&self, id: ClientId) -> String {
        let clients = self.clients.read().await;
        match clients.get(&id) {
            Some(info) => info.display_name(),
            None => format!("User#{}", id),
        }
    }

    /// Whether the client has not yet chosen a name.
    pub async fn is_anonymous(&self, id: ClientId) -> bool {
        let clients = self.clients.read().await;
        clients
            .get(&id)
            .map(|info| info.name == ClientName::Anonymous)
            .unwrap_or(false)
    }

    /// Find a client by chosen name, case-sensitive exact match.
    /// Anonymous clients never match, even against their placeholder.
    pub async fn find_by_name(&self, name: &str) -> Option<ClientId> {
        let clients = self.clients.read().await;
        clients
            .values()
            .find(|info| matches!(&info.name, ClientName::Named(n) if n == name))
            .map(|info| info.id)
    }

    /// Peer IP of a client, if it is registered.
    pub async fn ip_of(&self, id: ClientId) -> Option<String> {
        let clients = self.clients.read().await;
        clients.get(&id).map(|info| info.ip.clone())
    }

    /// Refresh the activity timestamp and bump the inbound counter.
    pub async fn record_inbound(&self, id: ClientId) {
        let mut clients = self.clients.write().await;
        if let Some(info) = clients.get_mut(&id) {
            info.last_activity = current_timestamp();
            info.message_count += 1;
        }
    }

    /// Snapshot of `(id, display name)` pairs ordered by ID.
    pub async fn snapshot(&self) -> Vec<(ClientId, String)> {
        let clients = self.clients.read().await;
        let mut list: Vec<_> = clients
            .values()
            .map(|info| (info.id, info.display_name()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }

    /// All registered IDs.
    pub async fn ids(&self) -> Vec<ClientId> {
        let clients = self.clients.read().await;
        clients.keys().copied().collect()
    }

    /// Number of registered clients.
    pub async fn len(&self) -> usize {
        let clients = self.clients.read().await;
        clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop the client's record, returning it if it existed.
    pub async fn remove(&self, id: ClientId) -> Option<ClientInfo> {
        let mut clients = self.clients.write().await;
        clients.remove(&id)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_until_named() {
        let registry = ClientRegistry::new();
        registry.register(7, "127.0.0.1:4000".to_string(), "127.0.0.1".to_string()).await;

        assert!(registry.is_anonymous(7).await);
        assert_eq!(registry.display_name(7).await, "User#7");

        registry.set_name(7, "alice").await;
        assert!(!registry.is_anonymous(7).await);
        assert_eq!(registry.display_name(7).await, "alice");
    }

    #[tokio::test]
    async fn lookup_is_case_sensitive_and_skips_placeholders() {
        let registry = ClientRegistry::new();
        registry.register(1, "127.0.0.1:4000".to_string(), "127.0.0.1".to_string()).await;
        registry.register(2, "127.0.0.1:4001".to_string(), "127.0.0.1".to_string()).await;
        registry.set_name(1, "alice").await;

        assert_eq!(registry.find_by_name("alice").await, Some(1));
        assert_eq!(registry.find_by_name("Alice").await, None);
        // Client 2 is still anonymous; its placeholder is not a name.
        assert_eq!(registry.find_by_name("User#2").await, None);
    }

    #[tokio::test]
    async fn a_typed_placeholder_is_an_ordinary_name() {
        let registry = ClientRegistry::new();
        registry.register(1, "127.0.0.1:4000".to_string(), "127.0.0.1".to_string()).await;
        registry.register(5, "127.0.0.1:4001".to_string(), "127.0.0.1".to_string()).await;
        registry.set_name(1, "User#5").await;

        // Resolves to the client who chose the name, not the anonymous one.
        assert_eq!(registry.find_by_name("User#5").await, Some(1));
    }

    #[tokio::test]
    async fn remove_returns_the_record() {
        let registry = ClientRegistry::new();
        registry.register(3, "10.0.0.9:5555".to_string(), "10.0.0.9".to_string()).await;
        registry.set_name(3, "carol").await;

        let info = registry.remove(3).await.expect("registered");
        assert_eq!(info.display_name(), "carol");
        assert_eq!(info.ip, "10.0.0.9");
        assert_eq!(info.state, ConnectionState::Authenticated);

        assert!(registry.remove(3).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn inbound_counter_and_activity_advance() {
        let registry = ClientRegistry::new();
        registry.register(1, "127.0.0.1:4000".to_string(), "127.0.0.1".to_string()).await;

        registry.record_inbound(1).await;
        registry.record_inbound(1).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot, vec![(1, "User#1".to_string())]);

        let info = registry.remove(1).await.unwrap();
        assert_eq!(info.message_count, 2);
        assert!(info.last_activity >= info.connected_at);
    }
}
