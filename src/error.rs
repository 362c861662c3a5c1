//! Error handling for the chat server

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Binding the listening socket failed (fatal at startup)
    Bind(String),
    /// Switching the bound socket into listening mode failed (fatal at startup)
    Listen(String),
    /// Accepting a single connection failed (transient)
    Accept(String),
    /// Reading from a client socket failed (closes that client)
    Read(String),
    /// Writing to a client socket failed (closes that client)
    Write(String),
    /// Client exceeded its per-minute message budget
    RateLimited,
    /// Client is muted
    Muted,
    /// Command word was not recognized
    UnknownCommand(String),
    /// No connected client carries the given name
    UserNotFound(String),
    /// Room name is already taken
    RoomExists(String),
    /// Room does not exist
    RoomMissing(String),
    /// Requester is not allowed to perform the operation
    PermissionDenied(String),
    /// Message log I/O failed
    Storage(String),
}

impl ChatError {
    /// Create a bind error
    pub fn bind<T: Into<String>>(msg: T) -> Self {
        ChatError::Bind(msg.into())
    }

    /// Create a listen error
    pub fn listen<T: Into<String>>(msg: T) -> Self {
        ChatError::Listen(msg.into())
    }

    /// Create an accept error
    pub fn accept<T: Into<String>>(msg: T) -> Self {
        ChatError::Accept(msg.into())
    }

    /// Create a read error
    pub fn read<T: Into<String>>(msg: T) -> Self {
        ChatError::Read(msg.into())
    }

    /// Create a write error
    pub fn write<T: Into<String>>(msg: T) -> Self {
        ChatError::Write(msg.into())
    }

    /// Create an unknown-command error
    pub fn unknown_command<T: Into<String>>(word: T) -> Self {
        ChatError::UnknownCommand(word.into())
    }

    /// Create a user-not-found error
    pub fn user_not_found<T: Into<String>>(name: T) -> Self {
        ChatError::UserNotFound(name.into())
    }

    /// Create a room-exists error
    pub fn room_exists<T: Into<String>>(name: T) -> Self {
        ChatError::RoomExists(name.into())
    }

    /// Create a room-missing error
    pub fn room_missing<T: Into<String>>(name: T) -> Self {
        ChatError::RoomMissing(name.into())
    }

    /// Create a permission-denied error
    pub fn permission_denied<T: Into<String>>(msg: T) -> Self {
        ChatError::PermissionDenied(msg.into())
    }

    /// Create a storage error
    pub fn storage<T: Into<String>>(msg: T) -> Self {
        ChatError::Storage(msg.into())
    }

    /// Whether this error is fatal to server startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChatError::Bind(_) | ChatError::Listen(_))
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Bind(msg) => write!(f, "Bind failed: {}", msg),
            ChatError::Listen(msg) => write!(f, "Listen failed: {}", msg),
            ChatError::Accept(msg) => write!(f, "Accept failed: {}", msg),
            ChatError::Read(msg) => write!(f, "Read failed: {}", msg),
            ChatError::Write(msg) => write!(f, "Write failed: {}", msg),
            ChatError::RateLimited => write!(f, "Message rate limit exceeded"),
            ChatError::Muted => write!(f, "Client is muted"),
            ChatError::UnknownCommand(word) => write!(f, "Unknown command: {}", word),
            ChatError::UserNotFound(name) => write!(f, "User not found: {}", name),
            ChatError::RoomExists(name) => write!(f, "Room already exists: {}", name),
            ChatError::RoomMissing(name) => write!(f, "Room not found: {}", name),
            ChatError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            ChatError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_startup_errors() {
        assert!(ChatError::bind("address in use").is_fatal());
        assert!(ChatError::listen("backlog").is_fatal());
        assert!(!ChatError::accept("transient").is_fatal());
        assert!(!ChatError::RateLimited.is_fatal());
    }

    #[test]
    fn display_carries_detail() {
        let err = ChatError::room_missing("devs");
        assert_eq!(err.to_string(), "Room not found: devs");
        let err = ChatError::user_not_found("carol");
        assert_eq!(err.to_string(), "User not found: carol");
    }
}
