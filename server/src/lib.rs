//! # Relay Server Library
//!
//! A small UDP relay that lets replication clients find each other. The relay
//! owns no game state. It assigns player IDs, forwards movement records, and
//! tells everyone when a player goes away.
//!
//! ## Responsibilities
//!
//! ### Handshake
//! A client sends `Join` with its protocol version and gets either
//! `Welcome { player_id }` or `Refused { reason }`. Joins are resent until
//! answered, so a repeated join from a known address is answered with the
//! same ID.
//!
//! ### Forwarding
//! `PlayerMovement` records are forwarded to every other client with the
//! player ID rewritten to the sender's own. `ProjectileMovement` records are
//! forwarded as they are. Datagrams from addresses that never joined are
//! dropped.
//!
//! ### Departures
//! An explicit `Leave` or a client that stays silent past the configured
//! timeout removes the client and broadcasts `Leave { player_id }` so the
//! remaining clients can despawn it.
//!
//! ## Module Organization
//!
//! - `client_manager`: roster, ID assignment and timeout detection
//! - `config`: bind address, capacity and timing knobs
//! - `network`: the relay loop and its receiver/timeout tasks
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod network;
