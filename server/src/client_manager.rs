//! Client roster for the relay
//!
//! This module handles the relay's view of joined clients, including:
//! - Player ID assignment on join, bounded by the relay's capacity
//! - Address lookup so incoming datagrams can be tied to a player
//! - Activity tracking and timeout cleanup for clients that vanish
//! - Re-admission of timed-out clients that resume sending
//!
//! The relay never inspects game state; the roster only decides who receives
//! forwarded records and which player ID a sender is allowed to speak for.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A joined client
#[derive(Debug)]
pub struct Client {
    /// Player ID assigned by the relay
    pub id: u32,
    /// Address datagrams are forwarded to
    pub addr: SocketAddr,
    /// Last time any datagram arrived from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing has arrived from this client within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all joined clients
///
/// Enforces the capacity limit and hands out player IDs. IDs start at 1 and
/// are never reused within one relay run, so a late datagram about a departed
/// player cannot be mistaken for a newcomer.
pub struct ClientManager {
    /// Joined clients indexed by player ID
    clients: HashMap<u32, Client>,
    /// Next player ID to hand out
    next_client_id: u32,
    /// Maximum number of concurrent clients
    max_clients: usize,
    /// Silence after which a client is dropped
    timeout: Duration,
    /// Player IDs of timed-out clients by address, kept for re-admission
    timed_out: HashMap<SocketAddr, u32>,
}

impl ClientManager {
    /// Creates an empty roster holding at most `max_clients` clients.
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
            timed_out: HashMap::new(),
        }
    }

    /// Attempts to add a new client
    ///
    /// Returns Some(player_id) if successful, None if the relay is full.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;
        self.timed_out.remove(&addr);

        info!("Client {} joined from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Re-admits a client that timed out but kept sending, under its old
    /// player ID.
    ///
    /// Returns None if the address never timed out here or the relay is full.
    /// A full relay keeps the record so a later attempt can still succeed.
    pub fn readmit_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.timed_out.remove(&addr)?;
        info!("Client {} resumed from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Removes a client. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} left", client.id);
            true
        } else {
            false
        }
    }

    /// Finds the player ID of the client at `addr`.
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks a client as active. Returns false for unknown IDs.
    pub fn touch(&mut self, client_id: u32) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Removes clients that have been silent longer than the timeout and
    /// returns their IDs.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timeout = self.timeout;
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            if let Some(client) = self.clients.remove(client_id) {
                info!("Client {} timed out", client.id);
                self.timed_out.insert(client.addr, client.id);
            }
        }

        timed_out
    }

    /// All client IDs and addresses, for forwarding.
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
