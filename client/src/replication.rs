//! Per-frame replication of remote players and projectiles.

use crate::config::ClientConfig;
use crate::network::{ConnectError, Connection, NetworkState};
use crate::scene::{EntityCollection, EntityId, MaterialHandle, MeshHandle};
use crate::staging::{PlayerUpdate, StagedBatch};
use log::{debug, info, warn};
use shared::{Packet, Transform, MAX_PROJECTILES};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("not connected")]
    NotConnected,
    #[error("projectile slot {0} is outside 0..{max}", max = MAX_PROJECTILES)]
    SlotOutOfRange(usize),
}

/// A peer's player as seen locally.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub id: u32,
    pub transform: Transform,
    pub entity: EntityId,
    /// Session time of the last update applied to this player.
    pub last_heard: f64,
}

/// A projectile registered in one of the fixed network slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkProjectile {
    pub entity: EntityId,
    pub transform: Transform,
}

/// What one `update` call did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub sent: usize,
    pub spawned: usize,
    pub updated: usize,
    pub projectiles_updated: usize,
    pub evicted: usize,
}

pub struct ReplicationManager {
    connection: Connection,
    remote_players: HashMap<u32, RemotePlayer>,
    projectiles: [Option<NetworkProjectile>; MAX_PROJECTILES],
    visuals: Option<(MeshHandle, MaterialHandle)>,
    /// Session time in seconds, advanced only by `update`
    clock: f64,
}

impl ReplicationManager {
    /// Creates an Offline manager. Nothing touches the network until `connect`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            connection: Connection::new(config),
            remote_players: HashMap::new(),
            projectiles: [None; MAX_PROJECTILES],
            visuals: None,
            clock: 0.0,
        }
    }

    /// Current state of the underlying connection.
    pub fn network_state(&self) -> NetworkState {
        self.connection.state()
    }

    /// Player ID assigned by the relay (or configured in direct mode).
    ///
    /// None while Offline.
    pub fn player_id(&self) -> Option<u32> {
        self.connection.player_id()
    }

    /// Local socket address while a transport is open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.local_addr()
    }

    /// Every remote player currently on the roster, in no particular order.
    pub fn remote_players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.remote_players.values()
    }

    /// Looks up a remote player by ID.
    pub fn remote_player(&self, id: u32) -> Option<&RemotePlayer> {
        self.remote_players.get(&id)
    }

    /// The projectile registered in `slot`, if any.
    ///
    /// Out-of-range slots return None.
    pub fn projectile(&self, slot: usize) -> Option<&NetworkProjectile> {
        self.projectiles.get(slot).and_then(Option::as_ref)
    }

    /// Connects and remembers the mesh and material used for remote players.
    /// On failure nothing is retained.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        local: &Transform,
        mesh: MeshHandle,
        material: MaterialHandle,
    ) -> Result<u32, ConnectError> {
        let player_id = self.connection.connect(host, port).await?;
        self.visuals = Some((mesh, material));
        self.clock = 0.0;

        // Announce ourselves right away so peers do not wait for the first frame
        if let Err(e) = self.connection.send(&Packet::PlayerMovement {
            player_id,
            transform: *local,
        }) {
            warn!("Failed to send initial position: {}", e);
        }

        Ok(player_id)
    }

    /// Disconnects and drops every remote player, despawning their entities.
    /// Returns success from Offline.
    pub async fn disconnect(
        &mut self,
        scene: &mut impl EntityCollection,
    ) -> Result<(), ConnectError> {
        let result = self.connection.disconnect().await;

        for (_, player) in self.remote_players.drain() {
            scene.despawn(player.entity);
        }
        self.projectiles = [None; MAX_PROJECTILES];
        self.visuals = None;

        result
    }

    /// Registers a freshly fired projectile in `slot`. Reusing an occupied
    /// slot replaces it and is logged, since the peer cannot tell the two
    /// projectiles apart.
    pub fn add_network_projectile(
        &mut self,
        entity: EntityId,
        transform: Transform,
        slot: usize,
    ) -> Result<(), ReplicationError> {
        if !self.connection.is_connected() {
            return Err(ReplicationError::NotConnected);
        }
        let entry = self
            .projectiles
            .get_mut(slot)
            .ok_or(ReplicationError::SlotOutOfRange(slot))?;

        if let Some(previous) = entry {
            warn!(
                "Projectile slot {} reused before {:?} resolved",
                slot, previous.entity
            );
        }
        *entry = Some(NetworkProjectile { entity, transform });
        Ok(())
    }

    /// Frees `slot` once its projectile has resolved.
    pub fn remove_network_projectile(
        &mut self,
        slot: usize,
    ) -> Result<Option<NetworkProjectile>, ReplicationError> {
        self.projectiles
            .get_mut(slot)
            .map(Option::take)
            .ok_or(ReplicationError::SlotOutOfRange(slot))
    }

    /// Runs once per simulation tick: sends local state, then applies what
    /// the receive loop staged since the previous call. Does nothing unless
    /// Connected.
    pub fn update(
        &mut self,
        dt: f32,
        local: &Transform,
        projectiles: &[Option<Transform>; MAX_PROJECTILES],
        scene: &mut impl EntityCollection,
    ) -> FrameSummary {
        let mut summary = FrameSummary::default();
        let Some(player_id) = self.connection.player_id().filter(|_| self.connection.is_connected())
        else {
            return summary;
        };

        self.clock += f64::from(dt);
        self.send_local_state(player_id, local, projectiles, &mut summary);

        let batch = self.connection.staging().take();
        self.apply_batch(batch, scene, &mut summary);
        self.evict_silent(scene, &mut summary);

        if summary.spawned + summary.evicted > 0 {
            debug!(
                "Frame at {:.2}s: {} spawned, {} evicted, {} remote players",
                self.clock,
                summary.spawned,
                summary.evicted,
                self.remote_players.len()
            );
        }
        summary
    }

    fn send_local_state(
        &mut self,
        player_id: u32,
        local: &Transform,
        projectiles: &[Option<Transform>; MAX_PROJECTILES],
        summary: &mut FrameSummary,
    ) {
        let outgoing = std::iter::once(Packet::PlayerMovement {
            player_id,
            transform: *local,
        })
        .chain(projectiles.iter().enumerate().filter_map(|(slot, transform)| {
            transform.map(|transform| Packet::ProjectileMovement {
                slot: slot as u8,
                transform,
            })
        }));

        for packet in outgoing {
            match self.connection.send(&packet) {
                Ok(true) => summary.sent += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to send {}: {}", packet.kind(), e),
            }
        }
    }

    fn apply_batch(
        &mut self,
        batch: StagedBatch,
        scene: &mut impl EntityCollection,
        summary: &mut FrameSummary,
    ) {
        for (id, update) in batch.players {
            match update {
                PlayerUpdate::Moved(transform) => self.apply_player(id, transform, scene, summary),
                PlayerUpdate::Left => {
                    if self.evict(id, scene) {
                        summary.evicted += 1;
                    }
                }
            }
        }

        for (slot, staged) in batch.projectiles.into_iter().enumerate() {
            let Some(transform) = staged else { continue };
            match self.projectiles[slot].as_mut() {
                Some(projectile) => {
                    projectile.transform = transform;
                    scene.set_transform(projectile.entity, transform);
                    summary.projectiles_updated += 1;
                }
                None => debug!("Dropped update for empty projectile slot {}", slot),
            }
        }
    }

    fn apply_player(
        &mut self,
        id: u32,
        transform: Transform,
        scene: &mut impl EntityCollection,
        summary: &mut FrameSummary,
    ) {
        match self.remote_players.entry(id) {
            Entry::Occupied(mut entry) => {
                let player = entry.get_mut();
                player.transform = transform;
                player.last_heard = self.clock;
                scene.set_transform(player.entity, transform);
                summary.updated += 1;
            }
            Entry::Vacant(entry) => {
                let Some((mesh, material)) = self.visuals else {
                    return;
                };
                let entity = scene.spawn(mesh, material, transform);
                info!("Remote player {} joined", id);
                entry.insert(RemotePlayer {
                    id,
                    transform,
                    entity,
                    last_heard: self.clock,
                });
                summary.spawned += 1;
            }
        }
    }

    fn evict(&mut self, id: u32, scene: &mut impl EntityCollection) -> bool {
        match self.remote_players.remove(&id) {
            Some(player) => {
                scene.despawn(player.entity);
                info!("Remote player {} left", id);
                true
            }
            None => false,
        }
    }

    fn evict_silent(&mut self, scene: &mut impl EntityCollection, summary: &mut FrameSummary) {
        let Some(timeout) = self.connection.config().remote_timeout else {
            return;
        };
        let timeout = timeout.as_secs_f64();
        let clock = self.clock;

        let silent: Vec<u32> = self
            .remote_players
            .values()
            .filter(|player| clock - player.last_heard > timeout)
            .map(|player| player.id)
            .collect();

        for id in silent {
            warn!("Remote player {} timed out", id);
            if self.evict(id, scene) {
                summary.evicted += 1;
            }
        }
    }
}
