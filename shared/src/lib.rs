//! Wire protocol shared by the relay server and its clients.
//!
//! A [`Packet`] is the only message type exchanged after the handshake. Each
//! variant carries the sender's username plus exactly one payload: movement
//! packets carry the held-keys string, every other kind carries a free-text
//! message. Framing lives in [`codec`].

pub mod codec;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Discriminant of a [`Packet`], used when a packet is built from loose parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    Movement,
    CollisionEvent,
    Logout,
    Heartbeat,
    NewConnection,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::Movement => "movement",
            PacketKind::CollisionEvent => "collision-event",
            PacketKind::Logout => "logout",
            PacketKind::Heartbeat => "heartbeat",
            PacketKind::NewConnection => "new-connection",
        };
        f.write_str(name)
    }
}

/// Loose payload used by [`Packet::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Free text: role labels, join and disconnect notices.
    Message(String),
    /// Encoded set of control keys currently held. Movement only.
    Keys(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("{kind} packets cannot carry a {found} payload")]
    PayloadMismatch { kind: PacketKind, found: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Movement { username: String, keys: String },
    CollisionEvent { username: String, message: String },
    Logout { username: String, message: String },
    Heartbeat { username: String, message: String },
    NewConnection { username: String, message: String },
}

impl Packet {
    /// Builds a packet from a kind and a payload, rejecting combinations
    /// where the payload does not match the kind.
    pub fn new(
        kind: PacketKind,
        username: impl Into<String>,
        payload: Payload,
    ) -> Result<Self, PacketError> {
        let username = username.into();
        match (kind, payload) {
            (PacketKind::Movement, Payload::Keys(keys)) => Ok(Packet::Movement { username, keys }),
            (PacketKind::Movement, Payload::Message(_)) => Err(PacketError::PayloadMismatch {
                kind,
                found: "message",
            }),
            (_, Payload::Keys(_)) => Err(PacketError::PayloadMismatch { kind, found: "keys" }),
            (PacketKind::CollisionEvent, Payload::Message(message)) => {
                Ok(Packet::CollisionEvent { username, message })
            }
            (PacketKind::Logout, Payload::Message(message)) => Ok(Packet::Logout { username, message }),
            (PacketKind::Heartbeat, Payload::Message(message)) => {
                Ok(Packet::Heartbeat { username, message })
            }
            (PacketKind::NewConnection, Payload::Message(message)) => {
                Ok(Packet::NewConnection { username, message })
            }
        }
    }

    pub fn movement(username: impl Into<String>, keys: impl Into<String>) -> Self {
        Packet::Movement {
            username: username.into(),
            keys: keys.into(),
        }
    }

    pub fn collision(username: impl Into<String>, message: impl Into<String>) -> Self {
        Packet::CollisionEvent {
            username: username.into(),
            message: message.into(),
        }
    }

    pub fn logout(username: impl Into<String>, message: impl Into<String>) -> Self {
        Packet::Logout {
            username: username.into(),
            message: message.into(),
        }
    }

    /// Server-synthesized liveness probe: no username, no message.
    pub fn heartbeat() -> Self {
        Packet::Heartbeat {
            username: String::new(),
            message: String::new(),
        }
    }

    pub fn new_connection(username: impl Into<String>, message: impl Into<String>) -> Self {
        Packet::NewConnection {
            username: username.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Movement { .. } => PacketKind::Movement,
            Packet::CollisionEvent { .. } => PacketKind::CollisionEvent,
            Packet::Logout { .. } => PacketKind::Logout,
            Packet::Heartbeat { .. } => PacketKind::Heartbeat,
            Packet::NewConnection { .. } => PacketKind::NewConnection,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Packet::Movement { username, .. }
            | Packet::CollisionEvent { username, .. }
            | Packet::Logout { username, .. }
            | Packet::Heartbeat { username, .. }
            | Packet::NewConnection { username, .. } => username,
        }
    }

    /// Text payload; `None` for movement packets.
    pub fn message(&self) -> Option<&str> {
        match self {
            Packet::Movement { .. } => None,
            Packet::CollisionEvent { message, .. }
            | Packet::Logout { message, .. }
            | Packet::Heartbeat { message, .. }
            | Packet::NewConnection { message, .. } => Some(message),
        }
    }

    /// Held-keys payload; only movement packets carry one.
    pub fn keys(&self) -> Option<&str> {
        match self {
            Packet::Movement { keys, .. } => Some(keys),
            _ => None,
        }
    }

    pub fn payload(&self) -> Payload {
        match self {
            Packet::Movement { keys, .. } => Payload::Keys(keys.clone()),
            Packet::CollisionEvent { message, .. }
            | Packet::Logout { message, .. }
            | Packet::Heartbeat { message, .. }
            | Packet::NewConnection { message, .. } => Payload::Message(message.clone()),
        }
    }
}
