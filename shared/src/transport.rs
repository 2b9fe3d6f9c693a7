//! UDP transport session shared by the client and the relay.
//!
//! A `Transport` is a cheap cloneable handle. Closing any clone closes the
//! session for all of them and wakes every pending `recv_from`.

use log::{debug, info};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no address found for {host}:{port}")]
    NoAddress { host: String, port: u16 },
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("transport has no peer address")]
    NoPeer,
    #[error("transport session is closed")]
    Closed,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    closed: watch::Sender<bool>,
}

impl Transport {
    /// Resolves `host:port` as the peer and binds an ephemeral wildcard local
    /// socket of the same address family.
    pub async fn open(host: &str, port: u16) -> Result<Self, TransportError> {
        Self::open_from(host, port, 0).await
    }

    /// Like `open`, but binds the given local port (0 for ephemeral).
    pub async fn open_from(host: &str, port: u16, local_port: u16) -> Result<Self, TransportError> {
        let peer = lookup_host((host, port))
            .await
            .map_err(|source| TransportError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::NoAddress {
                host: host.to_string(),
                port,
            })?;

        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, local_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, local_port).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::Bind {
                addr: local,
                source,
            })?;

        info!("Transport opened for peer {}", peer);
        Ok(Self::from_socket(socket, Some(peer)))
    }

    /// Binds a socket on an explicit address with no default peer.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        Ok(Self::from_socket(socket, None))
    }

    fn from_socket(socket: UdpSocket, peer: Option<SocketAddr>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                socket,
                peer,
                closed,
            }),
        }
    }

    /// The peer resolved by `open`, or None for a transport made with `bind`.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Address the socket is bound to.
    ///
    /// Sessions made with `open` bind the wildcard address, so the IP here is
    /// unspecified; only the port identifies the session.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Fire-and-forget send. Never waits: a full OS send queue drops the
    /// datagram and reports zero bytes written.
    pub fn send_to(&self, buf: &[u8], dest: SocketAddr) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match self.inner.socket.try_send_to(buf, dest) {
            Ok(sent) => Ok(sent),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Send queue full, dropped {} bytes to {}", buf.len(), dest);
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sends to the peer given to `open`.
    pub fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let peer = self.inner.peer.ok_or(TransportError::NoPeer)?;
        self.send_to(buf, peer)
    }

    /// Waits for the next datagram. Returns `Closed` as soon as the session
    /// is closed, including while already waiting.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::Closed);
        }

        tokio::select! {
            result = self.inner.socket.recv_from(buf) => Ok(result?),
            _ = closed.changed() => Err(TransportError::Closed),
        }
    }

    /// Closes the session for every clone of this handle.
    ///
    /// Pending `recv_from` calls return `Closed` and later sends fail.
    /// Calling it again does nothing.
    pub fn close(&self) {
        if !self.inner.closed.send_replace(true) {
            debug!("Transport closed");
        }
    }

    /// Returns true once any clone has called `close`.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_and_receive_between_sessions() {
        let receiver = Transport::bind(loopback()).await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let sender = Transport::open("127.0.0.1", port).await.unwrap();

        assert_eq!(sender.peer(), Some(receiver.local_addr().unwrap()));
        assert_eq!(assert_ok!(sender.send(b"ping")), 4);

        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"ping");
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_receive() {
        let transport = Transport::bind(loopback()).await.unwrap();
        let waiting = transport.clone();

        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            waiting.recv_from(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close();

        let result = timeout(Duration::from_secs(1), pending)
            .await
            .expect("receive did not return after close")
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_sends() {
        let transport = Transport::bind(loopback()).await.unwrap();
        let dest = transport.local_addr().unwrap();

        transport.close();
        transport.close();

        assert!(transport.is_closed());
        assert!(matches!(
            transport.send_to(b"late", dest),
            Err(TransportError::Closed)
        ));

        let mut buf = [0u8; 8];
        assert_err!(transport.recv_from(&mut buf).await);
    }

    #[tokio::test]
    async fn test_send_without_peer_fails() {
        let transport = Transport::bind(loopback()).await.unwrap();
        assert!(matches!(transport.send(b"x"), Err(TransportError::NoPeer)));
    }

    #[tokio::test]
    async fn test_open_rejects_unresolvable_host() {
        let result = Transport::open("host.invalid", 9000).await;
        assert!(matches!(
            result,
            Err(TransportError::Resolve { .. }) | Err(TransportError::NoAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = Transport::bind(loopback()).await.unwrap();
        let taken = first.local_addr().unwrap();

        let result = Transport::bind(taken).await;
        assert!(matches!(result, Err(TransportError::Bind { addr, .. }) if addr == taken));
    }
}
