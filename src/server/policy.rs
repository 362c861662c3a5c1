//! Connection and message policy
//!
//! Rate limiting, IP bans, mutes, and idle-timeout detection. Each state
//! family lives under its own lock, and no lock is held across calls into
//! other components. Sliding windows are evicted lazily on each access, so
//! the cost stays proportional to the window size.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ClientId;

/// Width of the connection-rate window.
const CONNECTION_WINDOW: Duration = Duration::from_secs(1);
/// Width of the per-client message-rate window.
const MESSAGE_WINDOW: Duration = Duration::from_secs(60);

/// Policy configuration
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Rate limit for new connections
    pub max_connections_per_second: usize,
    /// Spam prevention
    pub max_messages_per_minute: usize,
    /// Heartbeat check interval (advisory)
    pub heartbeat_interval_seconds: u64,
    /// Disconnect if no activity for this long
    pub connection_timeout_seconds: u64,
    /// Maximum concurrent connections
    pub max_total_connections: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_connections_per_second: 50,
            max_messages_per_minute: 60,
            heartbeat_interval_seconds: 30,
            connection_timeout_seconds: 120,
            max_total_connections: 1000,
        }
    }
}

/// How long a mute lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteState {
    /// Until explicitly unmuted
    Forever,
    /// Until the given instant, removed lazily on the next check
    Until(Instant),
}

/// Connection admission, message rates, bans, mutes, and idle tracking
pub struct ConnectionPolicy {
    config: PolicyConfig,
    /// Timestamps of recent connection attempts, shared across all peers
    connection_times: Mutex<VecDeque<Instant>>,
    /// Per-client message timestamps
    message_times: Mutex<HashMap<ClientId, VecDeque<Instant>>>,
    /// Banned IP addresses
    banned_ips: Mutex<HashSet<String>>,
    /// Muted clients
    mutes: Mutex<HashMap<ClientId, MuteState>>,
    /// Last inbound activity per client, for the idle sweep
    activity: Mutex<HashMap<ClientId, Instant>>,
    current_connections: AtomicUsize,
}

impl ConnectionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            connection_times: Mutex::new(VecDeque::new()),
            message_times: Mutex::new(HashMap::new()),
            banned_ips: Mutex::new(HashSet::new()),
            mutes: Mutex::new(HashMap::new()),
            activity: Mutex::new(HashMap::new()),
            current_connections: AtomicUsize::new(0),
        }
    }

    /// Decide whether a new connection from `ip` may be admitted: not
    /// banned, under the total cap, and under the per-second rate.
    /// Admission appends the attempt to the rate window.
    pub async fn allow_connection(&self, ip: &str) -> bool {
        if self.is_banned(ip).await {
            return false;
        }

        if self.current_connections.load(Ordering::SeqCst) >= self.config.max_total_connections {
            return false;
        }

        let now = Instant::now();
        let mut times = self.connection_times.lock().await;
        evict_older_than(&mut times, now, CONNECTION_WINDOW);

        if times.len() >= self.config.max_connections_per_second {
            return false;
        }
        times.push_back(now);
        true
    }

    /// Decide whether a client may send a message right now: not muted and
    /// strictly under the per-minute budget.
    pub async fn allow_message(&self, client_id: ClientId) -> bool {
        if self.is_muted(client_id).await {
            return false;
        }

        let now = Instant::now();
        let mut times = self.message_times.lock().await;
        let window = times.entry(client_id).or_default();
        evict_older_than(window, now, MESSAGE_WINDOW);

        window.len() < self.config.max_messages_per_minute
    }

    /// Record a sent message and refresh the client's activity.
    pub async fn record_message(&self, client_id: ClientId) {
        {
            let mut times = self.message_times.lock().await;
            times.entry(client_id).or_default().push_back(Instant::now());
        }
        self.update_activity(client_id).await;
    }

    pub async fn is_banned(&self, ip: &str) -> bool {
        let banned = self.banned_ips.lock().await;
        banned.contains(ip)
    }

    pub async fn ban(&self, ip: &str) {
        let mut banned = self.banned_ips.lock().await;
        banned.insert(ip.to_string());
    }

    pub async fn unban(&self, ip: &str) {
        let mut banned = self.banned_ips.lock().await;
        banned.remove(ip);
    }

    /// Mute a client for `duration_seconds`, `0` meaning until unmuted.
    pub async fn mute(&self, client_id: ClientId, duration_seconds: u64) {
        let state = if duration_seconds == 0 {
            MuteState::Forever
        } else {
            MuteState::Until(Instant::now() + Duration::from_secs(duration_seconds))
        };
        let mut mutes = self.mutes.lock().await;
        mutes.insert(client_id, state);
    }

    pub async fn unmute(&self, client_id: ClientId) {
        let mut mutes = self.mutes.lock().await;
        mutes.remove(&client_id);
    }

    /// Whether the client is muted. Expired mutes are removed here.
    pub async fn is_muted(&self, client_id: ClientId) -> bool {
        let mut mutes = self.mutes.lock().await;
        match mutes.get(&client_id) {
            None => false,
            Some(MuteState::Forever) => true,
            Some(MuteState::Until(expiry)) => {
                if Instant::now() >= *expiry {
                    mutes.remove(&client_id);
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Refresh a client's idle-sweep timestamp.
    pub async fn update_activity(&self, client_id: ClientId) {
        let mut activity = self.activity.lock().await;
        activity.insert(client_id, Instant::now());
    }

    /// IDs among `clients` whose last activity is older than the configured
    /// timeout. Clients with no recorded activity are skipped.
    pub async fn check_timeouts(&self, clients: &[ClientId]) -> Vec<ClientId> {
        let timeout = Duration::from_secs(self.config.connection_timeout_seconds);
        let now = Instant::now();

        let activity = self.activity.lock().await;
        clients
            .iter()
            .copied()
            .filter(|id| {
                activity
                    .get(id)
                    .map(|last| now.duration_since(*last) > timeout)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Drop all per-client state at disconnect. IDs are never reused.
    pub async fn forget(&self, client_id: ClientId) {
        self.message_times.lock().await.remove(&client_id);
        self.mutes.lock().await.remove(&client_id);
        self.activity.lock().await.remove(&client_id);
    }

    /// Count a newly admitted connection.
    pub fn on_connect(&self) {
        self.current_connections.fetch_add(1, Ordering::SeqCst);
    }

    /// Release an admitted connection's slot.
    pub fn on_disconnect(&self) {
        let _ = self
            .current_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
    }

    pub fn connection_count(&self) -> usize {
        self.current_connections.load(Ordering::SeqCst)
    }
}

/// Drop window entries older than `window` relative to `now`.
fn evict_older_than(times: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = times.front() {
        if now.duration_since(*front) > window {
            times.pop_front();
        } else {
            break;
        }
    }
}
