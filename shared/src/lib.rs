use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

pub mod codec;
pub mod transport;

pub use codec::CodecError;
pub use transport::{Transport, TransportError};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_PACKET_SIZE: usize = 500;
pub const MAX_PROJECTILES: usize = 6;

/// Position and orientation of a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    /// Compares every component by bit pattern, so NaNs and signed zeros count.
    pub fn bits_eq(&self, other: &Transform) -> bool {
        let lhs = self.position.to_array().into_iter().chain(self.orientation.to_array());
        let rhs = other.position.to_array().into_iter().chain(other.orientation.to_array());
        lhs.zip(rhs).all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefuseReason {
    ServerFull,
    VersionMismatch,
}

/// Every record that travels in a datagram. One record per datagram.
///
/// Variant order is the wire discriminator: do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Join { protocol_version: u32 },
    Welcome { player_id: u32 },
    Refused { reason: RefuseReason },
    Leave { player_id: u32 },
    PlayerMovement { player_id: u32, transform: Transform },
    ProjectileMovement { slot: u8, transform: Transform },
}

impl Packet {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Join { .. } => "join",
            Packet::Welcome { .. } => "welcome",
            Packet::Refused { .. } => "refused",
            Packet::Leave { .. } => "leave",
            Packet::PlayerMovement { .. } => "player movement",
            Packet::ProjectileMovement { .. } => "projectile movement",
        }
    }

    /// Exact encoded size of this record in bytes.
    pub fn wire_size(&self) -> usize {
        match self {
            Packet::Join { .. } => codec::JOIN_SIZE,
            Packet::Welcome { .. } => codec::WELCOME_SIZE,
            Packet::Refused { .. } => codec::REFUSED_SIZE,
            Packet::Leave { .. } => codec::LEAVE_SIZE,
            Packet::PlayerMovement { .. } => codec::PLAYER_MOVEMENT_SIZE,
            Packet::ProjectileMovement { .. } => codec::PROJECTILE_MOVEMENT_SIZE,
        }
    }
}
