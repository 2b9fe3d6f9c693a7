//! Latest-state hand-off from the receive task to the frame loop.
//!
//! The receive task overwrites one entry per player ID and one per projectile
//! slot, so a slow frame sees only the newest state of each entity. The frame
//! loop swaps the whole batch out under the lock, which makes each batch
//! consumable exactly once and keeps records from being read half-written.

use parking_lot::Mutex;
use shared::{Packet, Transform, MAX_PROJECTILES};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerUpdate {
    Moved(Transform),
    Left,
}

#[derive(Debug, Default)]
pub struct StagedBatch {
    pub players: HashMap<u32, PlayerUpdate>,
    pub projectiles: [Option<Transform>; MAX_PROJECTILES],
}

impl StagedBatch {
    /// Returns true if no player or projectile entry was staged.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.projectiles.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StagingArea {
    batch: Arc<Mutex<StagedBatch>>,
}

impl StagingArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a decoded record. Returns false for records that carry no
    /// entity state.
    pub fn stage(&self, packet: Packet) -> bool {
        match packet {
            Packet::PlayerMovement {
                player_id,
                transform,
            } => {
                self.stage_player(player_id, transform);
                true
            }
            Packet::ProjectileMovement { slot, transform } => {
                self.stage_projectile(slot as usize, transform)
            }
            Packet::Leave { player_id } => {
                self.stage_departure(player_id);
                true
            }
            Packet::Join { .. } | Packet::Welcome { .. } | Packet::Refused { .. } => false,
        }
    }

    /// Records the newest transform for a player, replacing anything staged
    /// for it earlier in the frame, including a departure.
    pub fn stage_player(&self, player_id: u32, transform: Transform) {
        self.batch
            .lock()
            .players
            .insert(player_id, PlayerUpdate::Moved(transform));
    }

    /// Records that a player left. A later movement for the same ID replaces it.
    pub fn stage_departure(&self, player_id: u32) {
        self.batch.lock().players.insert(player_id, PlayerUpdate::Left);
    }

    /// Records the newest transform for a projectile slot.
    ///
    /// Returns false and stages nothing if `slot` is out of range.
    pub fn stage_projectile(&self, slot: usize, transform: Transform) -> bool {
        match self.batch.lock().projectiles.get_mut(slot) {
            Some(entry) => {
                *entry = Some(transform);
                true
            }
            None => false,
        }
    }

    /// Returns true if anything was staged since the last `take`.
    pub fn has_new_data(&self) -> bool {
        !self.batch.lock().is_empty()
    }

    /// Takes everything staged so far and leaves the area empty.
    pub fn take(&self) -> StagedBatch {
        std::mem::take(&mut *self.batch.lock())
    }

    /// Drops everything staged. Used when a session starts or ends.
    pub fn clear(&self) {
        *self.batch.lock() = StagedBatch::default();
    }
}
