//! Fixed-size datagram records.
//!
//! Every record starts with a 4-byte little-endian discriminator followed by
//! fixed-width fields, so the expected length is known as soon as the first
//! four bytes are read. A datagram whose length disagrees with its
//! discriminator is rejected before any field is decoded.

use crate::{Packet, Transform, MAX_PROJECTILES};
use thiserror::Error;

const DISCRIMINATOR_SIZE: usize = 4;
const TRANSFORM_SIZE: usize = 3 * 4 + 4 * 4;

pub const JOIN_SIZE: usize = DISCRIMINATOR_SIZE + 4;
pub const WELCOME_SIZE: usize = DISCRIMINATOR_SIZE + 4;
pub const REFUSED_SIZE: usize = DISCRIMINATOR_SIZE + 4;
pub const LEAVE_SIZE: usize = DISCRIMINATOR_SIZE + 4;
pub const PLAYER_MOVEMENT_SIZE: usize = DISCRIMINATOR_SIZE + 4 + TRANSFORM_SIZE;
pub const PROJECTILE_MOVEMENT_SIZE: usize = DISCRIMINATOR_SIZE + 1 + TRANSFORM_SIZE;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown record discriminator {0}")]
    UnknownDiscriminator(u32),
    #[error("{kind} record needs {expected} bytes, datagram has {actual}")]
    LengthMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("projectile slot {0} is outside 0..{max}", max = MAX_PROJECTILES)]
    SlotOutOfRange(usize),
    #[error("buffer of {available} bytes cannot hold a {needed}-byte record")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("expected a {expected} record, got {actual}")]
    UnexpectedKind {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("malformed record: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Maps a discriminator to the record's name and fixed length.
fn expected_size(discriminator: u32) -> Option<(&'static str, usize)> {
    match discriminator {
        0 => Some(("join", JOIN_SIZE)),
        1 => Some(("welcome", WELCOME_SIZE)),
        2 => Some(("refused", REFUSED_SIZE)),
        3 => Some(("leave", LEAVE_SIZE)),
        4 => Some(("player movement", PLAYER_MOVEMENT_SIZE)),
        5 => Some(("projectile movement", PROJECTILE_MOVEMENT_SIZE)),
        _ => None,
    }
}

/// Writes `packet` to the front of `buf` and returns the number of bytes used.
pub fn encode(packet: &Packet, buf: &mut [u8]) -> Result<usize, CodecError> {
    if let Packet::ProjectileMovement { slot, .. } = packet {
        check_slot(*slot as usize)?;
    }

    let needed = packet.wire_size();
    let available = buf.len();
    let out = buf
        .get_mut(..needed)
        .ok_or(CodecError::BufferTooSmall { needed, available })?;
    bincode::serialize_into(out, packet)?;
    Ok(needed)
}

/// Decodes exactly one record. The datagram must be exactly the record's size.
pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
    let Some(head) = bytes.get(..DISCRIMINATOR_SIZE) else {
        return Err(CodecError::LengthMismatch {
            kind: "any",
            expected: DISCRIMINATOR_SIZE,
            actual: bytes.len(),
        });
    };

    let discriminator = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let (kind, expected) =
        expected_size(discriminator).ok_or(CodecError::UnknownDiscriminator(discriminator))?;
    if bytes.len() != expected {
        return Err(CodecError::LengthMismatch {
            kind,
            expected,
            actual: bytes.len(),
        });
    }

    let packet: Packet = bincode::deserialize(bytes)?;
    if let Packet::ProjectileMovement { slot, .. } = packet {
        check_slot(slot as usize)?;
    }
    Ok(packet)
}

/// Encodes a `PlayerMovement` record. Returns the number of bytes written.
pub fn encode_player_movement(
    player_id: u32,
    transform: &Transform,
    buf: &mut [u8],
) -> Result<usize, CodecError> {
    encode(
        &Packet::PlayerMovement {
            player_id,
            transform: *transform,
        },
        buf,
    )
}

/// Decodes a datagram that must be a `PlayerMovement` record.
pub fn decode_player_movement(bytes: &[u8]) -> Result<(u32, Transform), CodecError> {
    match decode(bytes)? {
        Packet::PlayerMovement {
            player_id,
            transform,
        } => Ok((player_id, transform)),
        other => Err(CodecError::UnexpectedKind {
            expected: "player movement",
            actual: other.kind(),
        }),
    }
}

/// Encodes a `ProjectileMovement` record. Fails for slots outside
/// `0..MAX_PROJECTILES`.
pub fn encode_projectile_movement(
    slot: usize,
    transform: &Transform,
    buf: &mut [u8],
) -> Result<usize, CodecError> {
    check_slot(slot)?;
    encode(
        &Packet::ProjectileMovement {
            slot: slot as u8,
            transform: *transform,
        },
        buf,
    )
}

/// Decodes a datagram that must be a `ProjectileMovement` record with an
/// in-range slot.
pub fn decode_projectile_movement(bytes: &[u8]) -> Result<(usize, Transform), CodecError> {
    match decode(bytes)? {
        Packet::ProjectileMovement { slot, transform } => Ok((slot as usize, transform)),
        other => Err(CodecError::UnexpectedKind {
            expected: "projectile movement",
            actual: other.kind(),
        }),
    }
}

fn check_slot(slot: usize) -> Result<(), CodecError> {
    if slot < MAX_PROJECTILES {
        Ok(())
    } else {
        Err(CodecError::SlotOutOfRange(slot))
    }
}
