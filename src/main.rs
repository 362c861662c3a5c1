//! Multi-Room TCP Chat Server
//!
//! Usage:
//!   server [port]        # defaults to port 8080
//!
//! Clients connect with any line-oriented TCP client, pick a name with
//! their first line, and talk. `#help` lists the available commands.
//! Ctrl+C shuts the server down gracefully.

use std::env;

use banter::{ChatServer, ServerConfig, DEFAULT_PORT};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt().init();

    let port = match env::args().nth(1) {
        Some(arg) => match arg.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                eprintln!("invalid port: {}", arg);
                eprintln!("Usage: server [port]");
                std::process::exit(1);
            }
        },
        None => DEFAULT_PORT,
    };

    let config = ServerConfig {
        port,
        ..ServerConfig::default()
    };
    let mut server = ChatServer::new(config);

    if let Err(e) = server.start().await {
        error!("failed to start server: {}", e);
        std::process::exit(1);
    }

    info!("press Ctrl+C to stop the server");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to wait for shutdown signal: {}", e);
    }

    info!("shutting down server...");
    server.stop().await;
}
