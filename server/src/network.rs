//! Relay network layer handling joins, forwarding and timeouts

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use log::{debug, error, info, warn};
use shared::codec;
use shared::{
    Packet, RefuseReason, Transport, TransportError, MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    Shutdown,
}

/// Stops a running relay from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    /// Asks the relay loop to stop. The relay closes its socket and `run`
    /// returns.
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Relay already stopped");
        }
    }
}

/// Relay that answers joins and forwards movement records between clients
pub struct Server {
    transport: Transport,
    clients: Arc<RwLock<ClientManager>>,
    config: ServerConfig,
    send_buffer: [u8; MAX_PACKET_SIZE],

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Binds the relay socket. No task is started until `run`.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let transport = Transport::bind(config.bind_addr).await?;
        info!("Relay listening on {}", transport.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            transport,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            config,
            send_buffer: [0u8; MAX_PACKET_SIZE],
            server_tx,
            server_rx,
        })
    }

    /// Address the relay is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.transport.local_addr()?)
    }

    /// Returns a handle that can stop `run` from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match transport.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match codec::decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => debug!("Dropped datagram from {}: {}", addr, e),
                    },
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) -> JoinHandle<()> {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let period = self.config.timeout_check_interval;

        tokio::spawn(async move {
            let mut interval = interval(period);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        })
    }

    fn send_packet(&mut self, packet: &Packet, addr: SocketAddr) {
        let result = codec::encode(packet, &mut self.send_buffer)
            .map_err(|e| e.to_string())
            .and_then(|len| {
                self.transport
                    .send_to(&self.send_buffer[..len], addr)
                    .map_err(|e| e.to_string())
            });

        if let Err(e) = result {
            error!("Failed to send {} to {}: {}", packet.kind(), addr, e);
        }
    }

    /// Sends `packet` to every client except `exclude`
    async fn broadcast_packet(&mut self, packet: &Packet, exclude: Option<u32>) {
        let client_addrs = {
            let clients_guard = self.clients.read().await;
            clients_guard.get_client_addrs()
        };

        let len = match codec::encode(packet, &mut self.send_buffer) {
            Ok(len) => len,
            Err(e) => {
                error!("Failed to encode {}: {}", packet.kind(), e);
                return;
            }
        };

        for (client_id, addr) in client_addrs {
            if Some(client_id) == exclude {
                continue;
            }

            if let Err(e) = self.transport.send_to(&self.send_buffer[..len], addr) {
                error!("Failed to forward to client {}: {}", client_id, e);
            }
        }
    }

    /// Looks up the sender and marks it as active
    async fn sender_id(&self, addr: SocketAddr) -> Option<u32> {
        let mut clients = self.clients.write().await;
        let client_id = clients.find_client_by_addr(addr)?;
        clients.touch(client_id);
        Some(client_id)
    }

    /// Like `sender_id`, but a client that timed out and is sending again is
    /// re-admitted under its old ID while there is room.
    async fn active_sender_id(&self, addr: SocketAddr) -> Option<u32> {
        if let Some(client_id) = self.sender_id(addr).await {
            return Some(client_id);
        }

        let mut clients = self.clients.write().await;
        clients.readmit_client(addr)
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join { protocol_version } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "Refusing {} with protocol version {}",
                        addr, protocol_version
                    );
                    let reason = RefuseReason::VersionMismatch;
                    self.send_packet(&Packet::Refused { reason }, addr);
                    return;
                }

                // Joins are resent until welcomed, so a known address gets its
                // existing ID back
                let client_id = match self.sender_id(addr).await {
                    Some(existing) => Some(existing),
                    None => {
                        let mut clients = self.clients.write().await;
                        clients.add_client(addr)
                    }
                };

                match client_id {
                    Some(player_id) => self.send_packet(&Packet::Welcome { player_id }, addr),
                    None => {
                        warn!("Relay full, refusing {}", addr);
                        let reason = RefuseReason::ServerFull;
                        self.send_packet(&Packet::Refused { reason }, addr);
                    }
                }
            }

            Packet::PlayerMovement { transform, .. } => {
                let Some(client_id) = self.active_sender_id(addr).await else {
                    debug!("Movement from unknown sender {}", addr);
                    return;
                };

                // Senders may only speak for themselves
                let forwarded = Packet::PlayerMovement {
                    player_id: client_id,
                    transform,
                };
                self.broadcast_packet(&forwarded, Some(client_id)).await;
            }

            Packet::ProjectileMovement { .. } => {
                let Some(client_id) = self.active_sender_id(addr).await else {
                    debug!("Projectile from unknown sender {}", addr);
                    return;
                };
                self.broadcast_packet(&packet, Some(client_id)).await;
            }

            Packet::Leave { .. } => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    self.clients.write().await.remove_client(&client_id);
                    self.broadcast_packet(
                        &Packet::Leave {
                            player_id: client_id,
                        },
                        None,
                    )
                    .await;
                }
            }

            Packet::Welcome { .. } | Packet::Refused { .. } => {
                warn!("Unexpected {} record from {}", packet.kind(), addr);
            }
        }
    }

    /// Main relay loop. Returns after `ShutdownHandle::shutdown`.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let receiver = self.spawn_network_receiver();
        let timeout_checker = self.spawn_timeout_checker();

        info!("Relay started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::ClientTimeout { client_id } => {
                    debug!("Broadcasting leave for timed-out client {}", client_id);
                    self.broadcast_packet(
                        &Packet::Leave {
                            player_id: client_id,
                        },
                        None,
                    )
                    .await;
                }
                ServerMessage::Shutdown => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }

        self.transport.close();
        timeout_checker.abort();
        if let Err(e) = receiver.await {
            error!("Network receiver ended abnormally: {}", e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Transform;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start_relay(config: ServerConfig) -> (SocketAddr, ShutdownHandle, JoinHandle<()>) {
        let mut server = Server::new(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(async move {
            server.run().await.unwrap();
        });
        (addr, shutdown, handle)
    }

    fn test_config(max_clients: usize) -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_clients,
            ..ServerConfig::default()
        }
    }

    async fn test_client() -> Transport {
        Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    fn send(client: &Transport, relay: SocketAddr, packet: Packet) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = codec::encode(&packet, &mut buf).unwrap();
        client.send_to(&buf[..len], relay).unwrap();
    }

    async fn recv(client: &Transport, wait: Duration) -> Option<Packet> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        match timeout(wait, client.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(codec::decode(&buf[..len]).unwrap()),
            _ => None,
        }
    }

    async fn join(client: &Transport, relay: SocketAddr) -> u32 {
        send(
            client,
            relay,
            Packet::Join {
                protocol_version: PROTOCOL_VERSION,
            },
        );
        match recv(client, Duration::from_secs(1)).await {
            Some(Packet::Welcome { player_id }) => player_id,
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    fn movement(player_id: u32, x: f32) -> Packet {
        Packet::PlayerMovement {
            player_id,
            transform: Transform::from_position(glam::Vec3::new(x, 0.0, 0.0)),
        }
    }

    #[tokio::test]
    async fn test_join_assigns_distinct_ids() {
        let (relay, shutdown, handle) = start_relay(test_config(4)).await;
        let a = test_client().await;
        let b = test_client().await;

        let id_a = join(&a, relay).await;
        let id_b = join(&b, relay).await;
        assert_ne!(id_a, id_b);

        shutdown.shutdown();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_repeated_join_keeps_id() {
        let (relay, shutdown, _handle) = start_relay(test_config(4)).await;
        let a = test_client().await;

        let first = join(&a, relay).await;
        let second = join(&a, relay).await;
        assert_eq!(first, second);

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_version_mismatch_is_refused() {
        let (relay, shutdown, _handle) = start_relay(test_config(4)).await;
        let a = test_client().await;

        send(
            &a,
            relay,
            Packet::Join {
                protocol_version: PROTOCOL_VERSION + 1,
            },
        );
        assert_eq!(
            recv(&a, Duration::from_secs(1)).await,
            Some(Packet::Refused {
                reason: RefuseReason::VersionMismatch
            })
        );

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_full_relay_refuses() {
        let (relay, shutdown, _handle) = start_relay(test_config(1)).await;
        let a = test_client().await;
        let b = test_client().await;

        join(&a, relay).await;
        send(
            &b,
            relay,
            Packet::Join {
                protocol_version: PROTOCOL_VERSION,
            },
        );
        assert_eq!(
            recv(&b, Duration::from_secs(1)).await,
            Some(Packet::Refused {
                reason: RefuseReason::ServerFull
            })
        );

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_movement_is_forwarded_with_sender_id() {
        let (relay, shutdown, _handle) = start_relay(test_config(4)).await;
        let a = test_client().await;
        let b = test_client().await;
        let id_a = join(&a, relay).await;
        join(&b, relay).await;

        // A claims to be someone else; the relay corrects it
        send(&a, relay, movement(999, 4.0));

        assert_eq!(
            recv(&b, Duration::from_secs(1)).await,
            Some(movement(id_a, 4.0))
        );
        assert_eq!(recv(&a, Duration::from_millis(100)).await, None);

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_projectile_is_forwarded() {
        let (relay, shutdown, _handle) = start_relay(test_config(4)).await;
        let a = test_client().await;
        let b = test_client().await;
        join(&a, relay).await;
        join(&b, relay).await;

        let projectile = Packet::ProjectileMovement {
            slot: 2,
            transform: Transform::IDENTITY,
        };
        send(&a, relay, projectile);

        assert_eq!(recv(&b, Duration::from_secs(1)).await, Some(projectile));

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_sender_is_ignored() {
        let (relay, shutdown, _handle) = start_relay(test_config(4)).await;
        let member = test_client().await;
        let stranger = test_client().await;
        join(&member, relay).await;

        send(&stranger, relay, movement(1, 1.0));

        assert_eq!(recv(&member, Duration::from_millis(100)).await, None);

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_leave_is_broadcast() {
        let (relay, shutdown, _handle) = start_relay(test_config(4)).await;
        let a = test_client().await;
        let b = test_client().await;
        let id_a = join(&a, relay).await;
        join(&b, relay).await;

        send(&a, relay, Packet::Leave { player_id: id_a });

        assert_eq!(
            recv(&b, Duration::from_secs(1)).await,
            Some(Packet::Leave { player_id: id_a })
        );

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_resumed_client_keeps_its_id() {
        let config = ServerConfig {
            client_timeout: Duration::from_millis(200),
            timeout_check_interval: Duration::from_millis(50),
            ..test_config(4)
        };
        let (relay, shutdown, _handle) = start_relay(config).await;
        let stalled = test_client().await;
        let active = test_client().await;
        let stalled_id = join(&stalled, relay).await;
        let active_id = join(&active, relay).await;

        let mut saw_leave = false;
        for _ in 0..40 {
            send(&active, relay, movement(active_id, 0.0));
            if recv(&active, Duration::from_millis(50)).await
                == Some(Packet::Leave {
                    player_id: stalled_id,
                })
            {
                saw_leave = true;
                break;
            }
        }
        assert!(saw_leave);

        // Sending again brings the client back under the same ID
        send(&stalled, relay, movement(stalled_id, 3.0));
        assert_eq!(
            recv(&active, Duration::from_secs(1)).await,
            Some(movement(stalled_id, 3.0))
        );

        // And it receives forwarded records again, after whatever was queued
        // before it timed out
        send(&active, relay, movement(active_id, 1.0));
        let mut forwarded = false;
        while let Some(packet) = recv(&stalled, Duration::from_secs(1)).await {
            if packet == movement(active_id, 1.0) {
                forwarded = true;
                break;
            }
        }
        assert!(forwarded);

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_client_that_left_is_not_readmitted() {
        let (relay, shutdown, _handle) = start_relay(test_config(4)).await;
        let a = test_client().await;
        let b = test_client().await;
        let id_a = join(&a, relay).await;
        join(&b, relay).await;

        send(&a, relay, Packet::Leave { player_id: id_a });
        assert_eq!(
            recv(&b, Duration::from_secs(1)).await,
            Some(Packet::Leave { player_id: id_a })
        );

        send(&a, relay, movement(id_a, 2.0));
        assert_eq!(recv(&b, Duration::from_millis(100)).await, None);

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let config = ServerConfig {
            client_timeout: Duration::from_millis(200),
            timeout_check_interval: Duration::from_millis(50),
            ..test_config(4)
        };
        let (relay, shutdown, _handle) = start_relay(config).await;
        let silent = test_client().await;
        let active = test_client().await;
        let silent_id = join(&silent, relay).await;
        let active_id = join(&active, relay).await;

        let mut saw_leave = false;
        for _ in 0..40 {
            send(&active, relay, movement(active_id, 0.0));
            if let Some(Packet::Leave { player_id }) =
                recv(&active, Duration::from_millis(50)).await
            {
                assert_eq!(player_id, silent_id);
                saw_leave = true;
                break;
            }
        }
        assert!(saw_leave, "no leave broadcast for the silent client");

        shutdown.shutdown();
    }
}
