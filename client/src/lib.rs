//! # Replication Client Library
//!
//! Keeps a game client's view of remote players and projectiles in sync with
//! its peers over UDP. The library owns the network side only: rendering,
//! physics and the entity factories are reached through the traits and
//! opaque handles in [`scene`].
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The connection state machine (Offline → Connecting → Connected):
//! - Opening the transport and running the join handshake
//! - Starting and stopping the receive loop
//! - Gating every send on the Connected state
//!
//! ### Receiver Module (`receiver`)
//! The background task that waits on the socket, decodes each datagram and
//! stages the newest state per remote entity.
//!
//! ### Staging Module (`staging`)
//! The hand-off between the receive task and the frame loop. The receive task
//! overwrites per-entity entries; the frame loop takes the whole batch at once.
//!
//! ### Replication Module (`replication`)
//! The per-frame entry point. Sends local state, creates remote players on
//! first sight, applies staged transforms and evicts departed or silent peers.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::replication::ReplicationManager;
//! use client::scene::{MaterialHandle, MeshHandle, SceneEntities};
//! use shared::{Transform, MAX_PROJECTILES};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut scene = SceneEntities::new();
//! let mut manager = ReplicationManager::new(ClientConfig::default());
//!
//! let local = Transform::IDENTITY;
//! manager
//!     .connect("127.0.0.1", 8080, &local, MeshHandle(1), MaterialHandle(1))
//!     .await?;
//!
//! // Once per simulation tick
//! let projectiles = [None; MAX_PROJECTILES];
//! manager.update(1.0 / 60.0, &local, &projectiles, &mut scene);
//!
//! manager.disconnect(&mut scene).await?;
//! # Ok(())
//! # }
//! ```

pub mod bot;
pub mod config;
pub mod network;
pub mod receiver;
pub mod replication;
pub mod scene;
pub mod staging;
