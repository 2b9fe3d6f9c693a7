//! Background receive loop

use crate::staging::StagingArea;
use log::{debug, warn};
use shared::codec::{self, CodecError};
use shared::{Packet, Transport, TransportError, MAX_PACKET_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawns the task that receives, decodes and stages datagrams until the
/// transport is closed.
///
/// Datagrams from anyone but `peer` are dropped, as are records about the
/// local player itself.
pub fn spawn_receive_loop(
    transport: Transport,
    staging: StagingArea,
    local_player_id: u32,
    peer: Option<SocketAddr>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        loop {
            match transport.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    if peer.is_some_and(|peer| peer != addr) {
                        debug!("Dropped datagram from unexpected sender {}", addr);
                        continue;
                    }

                    if let Err(e) = stage_datagram(&buffer[..len], &staging, local_player_id) {
                        debug!("Dropped datagram from {}: {}", addr, e);
                    }
                }
                Err(TransportError::Closed) => {
                    debug!("Receive loop stopped");
                    break;
                }
                Err(e) => {
                    warn!("Error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

/// Decodes one datagram and stages it. Returns whether anything was staged.
pub fn stage_datagram(
    bytes: &[u8],
    staging: &StagingArea,
    local_player_id: u32,
) -> Result<bool, CodecError> {
    let packet = codec::decode(bytes)?;

    match packet {
        Packet::PlayerMovement { player_id, .. } | Packet::Leave { player_id }
            if player_id == local_player_id =>
        {
            Ok(false)
        }
        packet => Ok(staging.stage(packet)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::PlayerUpdate;
    use glam::Vec3;
    use shared::codec::PLAYER_MOVEMENT_SIZE;
    use shared::Transform;
    use tokio::time::{sleep, timeout};

    fn encoded_player(player_id: u32, x: f32) -> Vec<u8> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = codec::encode_player_movement(
            player_id,
            &Transform::from_position(Vec3::new(x, 0.0, 0.0)),
            &mut buf,
        )
        .unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn test_stage_datagram_stages_remote_player() {
        let staging = StagingArea::new();
        assert!(stage_datagram(&encoded_player(2, 1.5), &staging, 1).unwrap());

        let batch = staging.take();
        assert_eq!(
            batch.players[&2],
            PlayerUpdate::Moved(Transform::from_position(Vec3::new(1.5, 0.0, 0.0)))
        );
    }

    #[test]
    fn test_stage_datagram_skips_local_player() {
        let staging = StagingArea::new();
        assert!(!stage_datagram(&encoded_player(1, 1.5), &staging, 1).unwrap());
        assert!(!staging.has_new_data());
    }

    #[test]
    fn test_garbled_datagram_stages_nothing() {
        let staging = StagingArea::new();
        let bytes = encoded_player(2, 1.5);

        assert!(stage_datagram(&bytes[..PLAYER_MOVEMENT_SIZE - 1], &staging, 1).is_err());
        assert!(stage_datagram(&[0xff; 12], &staging, 1).is_err());
        assert!(!staging.has_new_data());
    }

    #[tokio::test]
    async fn test_receive_loop_stages_and_stops_on_close() {
        let local = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let remote = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let staging = StagingArea::new();

        let handle = spawn_receive_loop(
            local.clone(),
            staging.clone(),
            1,
            Some(remote.local_addr().unwrap()),
        );

        let dest = local.local_addr().unwrap();
        remote.send_to(b"garbage", dest).unwrap();
        remote.send_to(&encoded_player(5, 3.0), dest).unwrap();

        let mut waited = 0;
        while !staging.has_new_data() && waited < 100 {
            sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(staging.take().players.contains_key(&5));

        local.close();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("receive loop did not exit after close")
            .unwrap();
    }

    #[tokio::test]
    async fn test_receive_loop_ignores_other_senders() {
        let local = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let stranger = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let staging = StagingArea::new();

        let handle = spawn_receive_loop(
            local.clone(),
            staging.clone(),
            1,
            Some(peer.local_addr().unwrap()),
        );

        let dest = local.local_addr().unwrap();
        stranger.send_to(&encoded_player(9, 1.0), dest).unwrap();
        peer.send_to(&encoded_player(4, 1.0), dest).unwrap();

        let mut waited = 0;
        while !staging.has_new_data() && waited < 100 {
            sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        sleep(Duration::from_millis(20)).await;

        let batch = staging.take();
        assert!(batch.players.contains_key(&4));
        assert!(!batch.players.contains_key(&9));

        local.close();
        handle.await.unwrap();
    }
}
