//! Connection state machine: Offline → Connecting → Connected.

use crate::config::ClientConfig;
use crate::receiver::spawn_receive_loop;
use crate::staging::StagingArea;
use log::{debug, error, info, warn};
use shared::codec::{self, CodecError};
use shared::{
    Packet, RefuseReason, Transport, TransportError, MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Offline,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot connect while {0:?}")]
    InvalidState(NetworkState),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("no welcome from {peer} within {timeout:?}")]
    HandshakeTimeout { peer: SocketAddr, timeout: Duration },
    #[error("connection refused: {0:?}")]
    Refused(RefuseReason),
    #[error("receive loop failed: {0}")]
    ReceiveLoop(#[from] JoinError),
}

/// One network session. Constructed and owned by the caller; nothing here is
/// process-global.
pub struct Connection {
    config: ClientConfig,
    state: NetworkState,
    transport: Option<Transport>,
    player_id: Option<u32>,
    staging: StagingArea,
    receiver: Option<JoinHandle<()>>,
    send_buffer: [u8; MAX_PACKET_SIZE],
}

impl Connection {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: NetworkState::Offline,
            transport: None,
            player_id: None,
            staging: StagingArea::new(),
            receiver: None,
            send_buffer: [0u8; MAX_PACKET_SIZE],
        }
    }

    /// Current connection state.
    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == NetworkState::Connected
    }

    /// Player ID of this session, None while Offline.
    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Staging area shared with the receive loop.
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Relay or peer address while a transport is open.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(Transport::peer)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(|t| t.local_addr().ok())
    }

    /// Opens the transport, performs the join handshake and starts the
    /// receive loop. Only valid from Offline; any failure leaves the
    /// connection Offline.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<u32, ConnectError> {
        if self.state != NetworkState::Offline {
            return Err(ConnectError::InvalidState(self.state));
        }

        let transport = Transport::open_from(host, port, self.config.local_port).await?;
        self.state = NetworkState::Connecting;
        info!("Connecting to {}:{}...", host, port);

        let joined = match self.config.direct_player_id {
            Some(player_id) => Ok(player_id),
            None => self.handshake(&transport).await,
        };

        match joined {
            Ok(player_id) => {
                self.staging.clear();
                self.receiver = Some(spawn_receive_loop(
                    transport.clone(),
                    self.staging.clone(),
                    player_id,
                    transport.peer(),
                ));
                self.transport = Some(transport);
                self.player_id = Some(player_id);
                self.state = NetworkState::Connected;
                info!("Connected! Player ID: {}", player_id);
                Ok(player_id)
            }
            Err(e) => {
                warn!("Connection to {}:{} failed: {}", host, port, e);
                transport.close();
                self.state = NetworkState::Offline;
                Err(e)
            }
        }
    }

    async fn handshake(&self, transport: &Transport) -> Result<u32, ConnectError> {
        let peer = transport.peer().ok_or(TransportError::NoPeer)?;
        let mut join = [0u8; MAX_PACKET_SIZE];
        let join_len = codec::encode(
            &Packet::Join {
                protocol_version: PROTOCOL_VERSION,
            },
            &mut join,
        )?;

        let timeout = self.config.handshake_timeout;
        let deadline = Instant::now() + timeout;
        let mut retry = interval(self.config.join_retry_interval.max(Duration::from_millis(1)));
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                _ = retry.tick() => {
                    transport.send(&join[..join_len])?;
                    debug!("Sent join to {}", peer);
                },

                result = transport.recv_from(&mut buffer) => {
                    let (len, from) = result?;
                    if from != peer {
                        continue;
                    }

                    match codec::decode(&buffer[..len]) {
                        Ok(Packet::Welcome { player_id }) => return Ok(player_id),
                        Ok(Packet::Refused { reason }) => return Err(ConnectError::Refused(reason)),
                        Ok(other) => debug!("Ignoring {} record while connecting", other.kind()),
                        Err(e) => debug!("Dropped datagram while connecting: {}", e),
                    }
                },

                _ = sleep_until(deadline) => {
                    return Err(ConnectError::HandshakeTimeout { peer, timeout });
                },
            }
        }
    }

    /// Stops the receive loop and closes the transport. A no-op from Offline.
    pub async fn disconnect(&mut self) -> Result<(), ConnectError> {
        if self.state == NetworkState::Offline {
            return Ok(());
        }

        if let (Some(player_id), true) = (self.player_id, self.is_connected()) {
            if let Err(e) = self.send(&Packet::Leave { player_id }) {
                warn!("Failed to send leave: {}", e);
            }
        }

        let mut result = Ok(());
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if let Some(receiver) = self.receiver.take() {
            if let Err(e) = receiver.await {
                error!("Receive loop ended abnormally: {}", e);
                result = Err(e.into());
            }
        }

        self.staging.clear();
        self.player_id = None;
        self.state = NetworkState::Offline;
        info!("Disconnected");
        result
    }

    /// Encodes and sends one record to the peer. Returns `Ok(false)` without
    /// sending when not Connected.
    pub fn send(&mut self, packet: &Packet) -> Result<bool, ConnectError> {
        let Some(transport) = self.transport.as_ref().filter(|_| self.is_connected()) else {
            return Ok(false);
        };

        let len = codec::encode(packet, &mut self.send_buffer)?;
        transport.send(&self.send_buffer[..len])?;
        Ok(true)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(transport) = &self.transport {
            transport.close();
        }
    }
}
