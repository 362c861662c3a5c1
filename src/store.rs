//! Two-tier message storage
//!
//! The in-memory tier keeps a bounded queue of recent messages per room for
//! `#history` and search. The on-disk tier is an append-only daily log with
//! size-based rotation. The two tiers sit under independent locks so a slow
//! disk write never stalls readers of the cache.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDate};
use tokio::sync::{Mutex, RwLock};
use tracing::error;

use crate::ClientId;

/// A chat message record, used both as the cache entry and as the
/// serialized log line.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Stable ID of the sender
    pub sender_id: ClientId,
    /// Display name of the sender as resolved at send time
    pub sender_name: String,
    /// Room the message was sent to
    pub room: String,
    /// Message text
    pub content: String,
    /// Wall-clock send time
    pub timestamp: DateTime<Local>,
}

impl ChatMessage {
    pub fn new(sender_id: ClientId, sender_name: String, room: String, content: String) -> Self {
        Self {
            sender_id,
            sender_name,
            room,
            content,
            timestamp: Local::now(),
        }
    }

    /// `[YYYY-MM-DD HH:MM:SS] [#room] name: content`
    pub fn to_line(&self) -> String {
        format!(
            "[{}] [#{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.room,
            self.sender_name,
            self.content
        )
    }
}

/// Message store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// In-memory cache size per room
    pub max_messages_per_room: usize,
    /// Max log file size before rotation, in megabytes
    pub max_file_size_mb: u64,
    /// Directory the daily log files live in
    pub log_directory: PathBuf,
    /// Whether to write the on-disk log at all
    pub enable_persistence: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_messages_per_room: 100,
            max_file_size_mb: 10,
            log_directory: PathBuf::from("./chat_logs"),
            enable_persistence: true,
        }
    }
}

/// Persistent message storage with an in-memory cache
pub struct MessageStore {
    max_messages_per_room: usize,
    /// In-memory cache per room
    cache: RwLock<HashMap<String, VecDeque<ChatMessage>>>,
    /// Append-only daily log
    sink: Mutex<LogSink>,
}

impl MessageStore {
    pub fn new(config: StoreConfig) -> Self {
        let sink = if config.enable_persistence {
            LogSink::open(config.log_directory, config.max_file_size_mb * 1024 * 1024)
        } else {
            LogSink::disabled(config.log_directory)
        };

        Self {
            max_messages_per_room: config.max_messages_per_room,
            cache: RwLock::new(HashMap::new()),
            sink: Mutex::new(sink),
        }
    }

    /// Store a message in the room's cache and append it to the log.
    ///
    /// Never fails: a log fault disables persistence for the remainder of
    /// the process instead of rejecting the message.
    pub async fn store(&self, message: ChatMessage) {
        {
            let mut cache = self.cache.write().await;
            let messages = cache.entry(message.room.clone()).or_default();
            messages.push_back(message.clone());

            // Trim if over limit
            while messages.len() > self.max_messages_per_room {
                messages.pop_front();
            }
        }

        let mut sink = self.sink.lock().await;
        sink.append(&message.to_line());
    }

    /// Get the last `count` messages of a room in chronological order
    /// (fewer if the cache holds fewer).
    pub async fn get_recent(&self, room: &str, count: usize) -> Vec<ChatMessage> {
        let cache = self.cache.read().await;
        let Some(messages) = cache.get(room) else {
            return Vec::new();
        };

        let start = messages.len().saturating_sub(count);
        messages.iter().skip(start).cloned().collect()
    }

    /// Get up to `count` cached messages from one sender across all rooms.
    pub async fn get_by_sender(&self, sender_id: ClientId, count: usize) -> Vec<ChatMessage> {
        let cache = self.cache.read().await;
        let mut result = Vec::new();

        for messages in cache.values() {
            for msg in messages {
                if msg.sender_id == sender_id {
                    result.push(msg.clone());
                    if result.len() >= count {
                        return result;
                    }
                }
            }
        }

        result
    }

    /// Find cached messages whose content contains `query`, ASCII
    /// case-insensitive, optionally restricted to one room.
    pub async fn search(&self, query: &str, room: Option<&str>, max_results: usize) -> Vec<ChatMessage> {
        let cache = self.cache.read().await;
        let query = query.to_ascii_lowercase();
        let mut result = Vec::new();

        let search_room = |messages: &VecDeque<ChatMessage>, result: &mut Vec<ChatMessage>| {
            for msg in messages {
                if result.len() >= max_results {
                    break;
                }
                if msg.content.to_ascii_lowercase().contains(&query) {
                    result.push(msg.clone());
                }
            }
        };

        match room {
            Some(room) => {
                if let Some(messages) = cache.get(room) {
                    search_room(messages, &mut result);
                }
            }
            None => {
                for messages in cache.values() {
                    search_room(messages, &mut result);
                    if result.len() >= max_results {
                        break;
                    }
                }
            }
        }

        result
    }

    /// Sum of all per-room cache lengths.
    pub async fn total_count(&self) -> usize {
        let cache = self.cache.read().await;
        cache.values().map(|m| m.len()).sum()
    }

    /// Empty one room's cache, or all of them.
    pub async fn clear(&self, room: Option<&str>) {
        let mut cache = self.cache.write().await;
        match room {
            Some(room) => {
                cache.remove(room);
            }
            None => cache.clear(),
        }
    }

    /// Force buffered log writes out to the OS.
    pub async fn flush(&self) {
        self.sink.lock().await.flush();
    }
}

/// Append handle for the daily log file.
///
/// Tracks the open file's byte count, seeded from the existing length at
/// open, and re-opens the file when the count reaches the size limit or the
/// calendar day changes.
struct LogSink {
    dir: PathBuf,
    limit_bytes: u64,
    writer: Option<BufWriter<File>>,
    written: u64,
    open_day: NaiveDate,
    enabled: bool,
}

impl LogSink {
    fn open(dir: PathBuf, limit_bytes: u64) -> Self {
        let mut sink = Self {
            dir,
            limit_bytes,
            writer: None,
            written: 0,
            open_day: Local::now().date_naive(),
            enabled: true,
        };
        sink.open_current();
        sink
    }

    fn disabled(dir: PathBuf) -> Self {
        Self {
            dir,
            limit_bytes: 0,
            writer: None,
            written: 0,
            open_day: Local::now().date_naive(),
            enabled: false,
        }
    }

    fn log_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("chat_{}.log", day.format("%Y%m%d")))
    }

    fn open_current(&mut self) {
        let today = Local::now().date_naive();
        let path = self.log_path(today);

        if let Err(e) = fs::create_dir_all(&self.dir) {
            error!("failed to create log directory {}: {}; persistence disabled", self.dir.display(), e);
            self.enabled = false;
            return;
        }

        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                // Appending to a file from an earlier run counts against
                // the same size limit.
                self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
                self.writer = Some(BufWriter::new(file));
                self.open_day = today;
            }
            Err(e) => {
                error!("failed to open log file {}: {}; persistence disabled", path.display(), e);
                self.enabled = false;
            }
        }
    }

    fn append(&mut self, line: &str) {
        if !self.enabled {
            return;
        }

        if Local::now().date_naive() != self.open_day {
            self.rotate();
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        if let Err(e) = writer.write_all(line.as_bytes()).and_then(|_| writer.write_all(b"\n")) {
            error!("log write failed: {}; persistence disabled", e);
            self.writer = None;
            self.enabled = false;
            return;
        }
        self.written += line.len() as u64 + 1;

        if self.written >= self.limit_bytes {
            self.rotate();
        }
    }

    fn rotate(&mut self) {
        self.flush();
        self.writer = None;
        self.written = 0;
        if self.enabled {
            self.open_current();
        }
    }

    fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                error!("log flush failed: {}", e);
            }
        }
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        // Best-effort flush so buffered lines survive shutdown.
        if let Ok(mut sink) = self.sink.try_lock() {
            sink.flush();
        }
    }
}
