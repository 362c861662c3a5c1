//! End-to-end scenarios driving an in-process server over real sockets.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use banter::{ChatServer, ServerConfig, StoreConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

fn temp_log_dir(tag: &str) -> PathBuf {
    let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("banter-e2e-{}-{}-{}", std::process::id(), tag, seq))
}

fn base_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        store: StoreConfig {
            enable_persistence: false,
            ..StoreConfig::default()
        },
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> (ChatServer, SocketAddr) {
    let mut server = ChatServer::new(config);
    server.start().await.expect("server should start");
    let addr = server.local_addr().expect("server is bound");
    (server, addr)
}

/// One scripted client connection.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Connect, consume the welcome, and register a name.
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut peer = Self::connect(addr).await;
        peer.expect_containing("Welcome to the chat server!").await;
        peer.send(name).await;
        peer
    }

    /// The server treats one read as one logical line, so writes are paced
    /// to keep back-to-back lines from coalescing into a single segment.
    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("write");
        sleep(Duration::from_millis(15)).await;
    }

    /// Next line, `None` on a closed connection.
    async fn recv_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => None,
            Ok(Ok(_)) => Some(line.trim_end_matches('\n').to_string()),
            Ok(Err(e)) => panic!("read error: {}", e),
            Err(_) => panic!("timed out waiting for a line"),
        }
    }

    /// Skip lines until one contains `needle`; panic if the connection
    /// closes or too many unrelated lines pass.
    async fn expect_containing(&mut self, needle: &str) -> String {
        for _ in 0..64 {
            match self.recv_line().await {
                Some(line) if line.contains(needle) => return line,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {:?}", needle),
            }
        }
        panic!("never saw a line containing {:?}", needle);
    }

    /// Assert that nothing arrives for a moment.
    async fn expect_silence(&mut self) {
        let mut line = String::new();
        let result = timeout(Duration::from_millis(300), self.reader.read_line(&mut line)).await;
        match result {
            Err(_) => {}
            Ok(Ok(0)) => {}
            Ok(_) => panic!("unexpected line: {:?}", line),
        }
    }

    /// Assert the server closes this connection.
    async fn expect_closed(&mut self) {
        for _ in 0..64 {
            if self.recv_line().await.is_none() {
                return;
            }
        }
        panic!("connection was not closed");
    }
}

#[tokio::test]
async fn chat_reaches_roommates_but_never_echoes() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect_containing("bob has joined #general").await;

    alice.send("hi").await;
    assert_eq!(bob.expect_containing("alice: hi").await, "alice: hi");
    alice.expect_silence().await;

    server.stop().await;
}

#[tokio::test]
async fn create_then_list_rooms_with_member_counts() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    alice.send("#create devs").await;
    alice.expect_containing("Created and joined #devs").await;

    alice.send("#rooms").await;
    alice.expect_containing("Available rooms:").await;
    assert_eq!(alice.recv_line().await.as_deref(), Some("  #devs (1 users)"));
    assert_eq!(alice.recv_line().await.as_deref(), Some("  #general (0 users)"));

    server.stop().await;
}

#[tokio::test]
async fn join_notifies_both_rooms() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect_containing("bob has joined #general").await;

    alice.send("#create devs").await;
    alice.expect_containing("Created and joined #devs").await;

    bob.send("#join devs").await;
    bob.expect_containing("Joined #devs").await;
    alice.expect_containing("bob joined #devs").await;

    bob.send("#join nowhere").await;
    bob.expect_containing("Failed to join room. Does it exist?").await;

    server.stop().await;
}

#[tokio::test]
async fn whisper_is_private() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    let mut carol = Peer::join(addr, "carol").await;
    alice.expect_containing("bob has joined #general").await;
    alice.expect_containing("carol has joined #general").await;

    alice.send("#whisper bob hello there").await;
    assert_eq!(
        bob.expect_containing("[Whisper from alice]:hello there").await,
        "[Whisper from alice]:hello there"
    );
    assert_eq!(
        alice.expect_containing("[Whisper to bob]:hello there").await,
        "[Whisper to bob]:hello there"
    );
    carol.expect_silence().await;

    alice.send("#whisper ghost boo").await;
    alice.expect_containing("User not found: ghost").await;

    server.stop().await;
}

#[tokio::test]
async fn rate_limit_cuts_off_the_flood() {
    let mut config = base_config();
    config.policy.max_messages_per_minute = 5;
    let (mut server, addr) = start_server(config).await;

    let mut alice = Peer::join(addr, "alice").await; // name spends one message
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect_containing("bob has joined #general").await;

    for i in 0..4 {
        alice.send(&format!("m{}", i)).await;
    }
    bob.expect_containing("alice: m3").await;

    alice.send("one too many").await;
    alice
        .expect_containing("You are sending too many messages. Please slow down.")
        .await;
    bob.expect_silence().await;

    server.stop().await;
}

#[tokio::test]
async fn mute_suppresses_until_it_expires() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect_containing("bob has joined #general").await;

    alice.send("#mute bob 1").await;
    bob.expect_containing("You have been muted for 1 seconds").await;
    alice.expect_containing("Muted bob for 1 seconds").await;

    bob.send("silenced").await;
    bob.expect_containing("You are muted.").await;
    alice.expect_silence().await;

    sleep(Duration::from_millis(1500)).await;

    bob.send("i am back").await;
    alice.expect_containing("bob: i am back").await;

    server.stop().await;
}

#[tokio::test]
async fn history_returns_recent_messages_with_clamped_counts() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect_containing("bob has joined #general").await;

    for i in 0..3 {
        alice.send(&format!("h{}", i)).await;
    }
    bob.expect_containing("alice: h2").await;

    // 0 falls back to the default of 10; only 3 are cached.
    alice.send("#history 0").await;
    alice.expect_containing("Last 3 messages in #general:").await;
    for i in 0..3 {
        let line = alice.recv_line().await.expect("history line");
        assert!(line.contains(&format!("alice: h{}", i)), "line was {:?}", line);
    }

    // 999 clamps to 50, which still returns everything cached.
    alice.send("#history 999").await;
    alice.expect_containing("Last 3 messages in #general:").await;

    server.stop().await;
}

#[tokio::test]
async fn kick_disconnects_and_announces() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect_containing("bob has joined #general").await;

    alice.send("#kick bob").await;
    bob.expect_containing("You have been kicked by alice").await;
    bob.expect_closed().await;

    alice.expect_containing("Kicked bob").await;
    alice.expect_containing("bob has left the chat").await;

    server.stop().await;
}

#[tokio::test]
async fn banned_ip_cannot_reconnect() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect_containing("bob has joined #general").await;

    alice.send("#ban bob").await;
    bob.expect_containing("You have been banned by alice").await;
    bob.expect_closed().await;
    alice.expect_containing("Banned IP for bob").await;

    // Everything comes from 127.0.0.1 here, so a fresh connection is
    // refused at admission: closed without a welcome.
    let mut retry = Peer::connect(addr).await;
    assert!(retry.recv_line().await.is_none());

    server.stop().await;
}

#[tokio::test]
async fn exit_closes_the_connection() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    alice.send("#exit").await;
    alice.expect_closed().await;

    server.stop().await;
}

#[tokio::test]
async fn unknown_commands_get_a_hint() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    alice.send("#frobnicate now").await;
    alice
        .expect_containing("Unknown command. Type #help for available commands.")
        .await;

    alice.send("#help").await;
    alice.expect_containing("Available commands:").await;

    server.stop().await;
}

#[tokio::test]
async fn online_lists_everyone_with_their_room() {
    let (mut server, addr) = start_server(base_config()).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    alice.expect_containing("bob has joined #general").await;

    bob.send("#create devs").await;
    bob.expect_containing("Created and joined #devs").await;

    alice.send("#online").await;
    alice.expect_containing("Online users (2):").await;
    assert_eq!(alice.recv_line().await.as_deref(), Some("  alice (#general)"));
    assert_eq!(alice.recv_line().await.as_deref(), Some("  bob (#devs)"));

    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_clients_and_flushes_the_log() {
    let dir = temp_log_dir("shutdown");
    let mut config = base_config();
    config.store = StoreConfig {
        log_directory: dir.clone(),
        ..StoreConfig::default()
    };
    let (mut server, addr) = start_server(config).await;

    let mut alice = Peer::join(addr, "alice").await;
    let mut bob = Peer::join(addr, "bob").await;
    let mut carol = Peer::join(addr, "carol").await;
    alice.expect_containing("carol has joined #general").await;

    alice.send("hello world").await;
    // Fan-out happens after the store, so bob seeing the line means the
    // message is in the log buffer.
    bob.expect_containing("alice: hello world").await;

    server.stop().await;

    alice.expect_closed().await;
    bob.expect_closed().await;
    carol.expect_closed().await;

    let name = format!("chat_{}.log", chrono::Local::now().format("%Y%m%d"));
    let contents = std::fs::read_to_string(dir.join(name)).expect("log file exists");
    assert!(contents.contains("[#general] alice: hello world\n"));

    std::fs::remove_dir_all(dir).ok();
}
