use serde::{Deserialize, Serialize};

use crate::game::entity::EntityHandle;
use crate::game::fields::GroupChanges;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// First message after connecting
    Init { name: String },
    /// Held keys and mouse position
    Input(PlayerInput),
    /// Ask for a tank; ignored while one is alive or the arena is not open
    Spawn { name: String },
    /// Latency probe, answered with `Pong` on the next tick
    Ping,
    /// Leave the match
    Leave,
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Connection registered with the simulation
    Accepted { connection: u64 },
    /// Replication records compiled for one tick
    Update { tick: u64, records: Vec<EntityRecord> },
    /// Text popup; a negative duration stays until dismissed
    Notification {
        message: String,
        color: u32,
        duration_ms: f32,
        tag: Option<String>,
    },
    Pong,
    /// Server is closing the connection
    Kicked { reason: String },
}

/// One replication record for a single entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityRecord {
    /// Entity entered view; carries every field of every present group
    Create {
        entity: EntityHandle,
        kind: String,
        groups: Vec<GroupChanges>,
    },
    /// Entity still in view; carries only the fields written this tick
    Update {
        entity: EntityHandle,
        groups: Vec<GroupChanges>,
    },
    /// Entity left view or was deleted
    Delete { entity: EntityHandle },
}

impl EntityRecord {
    pub fn entity(&self) -> EntityHandle {
        match self {
            EntityRecord::Create { entity, .. }
            | EntityRecord::Update { entity, .. }
            | EntityRecord::Delete { entity } => *entity,
        }
    }
}

pub mod input_flags {
    pub const UP: u32 = 1 << 0;
    pub const DOWN: u32 = 1 << 1;
    pub const LEFT: u32 = 1 << 2;
    pub const RIGHT: u32 = 1 << 3;
    pub const FIRE: u32 = 1 << 4;
}

/// Player input state, latest value wins
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Bitset of [`input_flags`]
    pub flags: u32,
    /// Mouse position in world space
    pub mouse_x: f32,
    pub mouse_y: f32,
}

impl PlayerInput {
    #[inline]
    pub fn held(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
