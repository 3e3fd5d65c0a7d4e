//! Shared event types for the post event stream.
//!
//! This crate provides the types exchanged between the SSE core and the code
//! that consumes it, without pulling in any transport or runtime dependency.
//!
//! # Types
//!
//! - **ResourceId**: identifies a stream topic (a post's comment stream)
//! - **ListenerId**: identifies one listener registration
//! - **EventFrame**: one parsed server-pushed event
//! - **ConnectionState** / **ConnectionStatus**: connection health, internal and projected
//!
//! Frame payloads are carried as `serde_json::Value`; their shape is a contract
//! between the server and the eventual consumer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Event kind used when a record carries no `event:` field.
pub const DEFAULT_EVENT_KIND: &str = "message";

/// Identifier of a stream topic, e.g. the id of a post whose comments are streamed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique identifier for a listener registration (client-generated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single parsed event pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// The event kind tag, e.g. `comment.created`.
    pub kind: String,
    /// Opaque payload, interpreted only by the eventual consumer.
    pub payload: Value,
    /// The SSE `id:` field of the record, when the server sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EventFrame {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Internal lifecycle state of a single stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
    /// Terminal state after an explicit close. Never shown as a failure.
    Closed,
}

/// Externally visible connection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Connected,
    Disconnected,
    Error,
}

impl From<ConnectionState> for Status {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Status::Connected,
            ConnectionState::Error => Status::Error,
            ConnectionState::Connecting
            | ConnectionState::Disconnected
            | ConnectionState::Closed => Status::Disconnected,
        }
    }
}

/// Read-only snapshot of a connection's health for passive display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub status: Status,
    pub reconnect_attempts: u32,
    /// Attempt cap in force for this connection, used only for display.
    #[serde(skip)]
    pub max_attempts: u32,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState, reconnect_attempts: u32, max_attempts: u32) -> Self {
        Self {
            status: state.into(),
            reconnect_attempts,
            max_attempts,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == Status::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.status == Status::Disconnected && self.reconnect_attempts > 0
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.status {
            Status::Connected => write!(f, "Connected"),
            Status::Error => write!(f, "Connection failed"),
            Status::Disconnected if self.is_reconnecting() => write!(
                f,
                "Reconnecting ({}/{})...",
                self.reconnect_attempts, self.max_attempts
            ),
            Status::Disconnected => write!(f, "Disconnected"),
        }
    }
}
