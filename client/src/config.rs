use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `connect` waits for the relay's welcome.
    pub handshake_timeout: Duration,
    /// Join datagrams are resent at this interval until welcomed.
    pub join_retry_interval: Duration,
    /// Remote players silent for longer than this (session time) are evicted.
    pub remote_timeout: Option<Duration>,
    /// Local UDP port, 0 for an ephemeral one.
    pub local_port: u16,
    /// Skip the handshake and use this player ID (peer-to-peer mode).
    pub direct_player_id: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(3),
            join_retry_interval: Duration::from_millis(250),
            remote_timeout: Some(Duration::from_secs(5)),
            local_port: 0,
            direct_player_id: None,
        }
    }
}

impl ClientConfig {
    /// Configuration for direct mode: no relay and no handshake.
    ///
    /// The caller picks the player ID and the local port the peer sends to.
    pub fn direct(player_id: u32, local_port: u16) -> Self {
        Self {
            direct_player_id: Some(player_id),
            local_port,
            ..Self::default()
        }
    }
}
