//! UDP transport.
//!
//! Members are `(address, port)` endpoints compared by value, so repeated
//! joins from one socket collapse into a single member. Every datagram is an
//! envelope frame; there is no connection and therefore no disconnect signal.

use bytes::Bytes;
use fanout_core::{ByValue, DeliveryError, Outbound};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{info, trace};

use crate::traits::{Transport, TransportError};

/// Largest possible UDP payload.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// UDP transport configuration.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Receive buffer size; longer datagrams are truncated by the OS and
    /// rejected here.
    pub max_datagram_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

/// A bound UDP relay socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    config: UdpConfig,
}

impl Transport for UdpTransport {
    const NAME: &'static str = "udp";
    type Member = SocketAddr;
    type Equality = ByValue;
    type Outbound = UdpOutbound;
}

impl UdpTransport {
    /// Bind a UDP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(config: UdpConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.bind_addr).await?;

        info!("UDP transport listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            config,
        })
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Get a sender that shares this socket.
    #[must_use]
    pub fn outbound(&self) -> UdpOutbound {
        UdpOutbound {
            socket: Arc::clone(&self.socket),
        }
    }

    /// Receive the next datagram and its sender.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket fails or the datagram filled the whole
    /// receive buffer (it may have been truncated).
    pub async fn recv(&self, buf: &mut Vec<u8>) -> Result<(Bytes, SocketAddr), TransportError> {
        // One spare byte tells a datagram of exactly max size from a truncated one.
        buf.resize(self.config.max_datagram_size + 1, 0);

        let (len, from) = self.socket.recv_from(buf).await?;
        trace!(from = %from, bytes = len, "Datagram received");

        if len > self.config.max_datagram_size {
            return Err(TransportError::MessageTooLarge {
                size: len,
                max: self.config.max_datagram_size,
            });
        }

        Ok((Bytes::copy_from_slice(&buf[..len]), from))
    }
}

/// Sends datagrams through a shared UDP socket.
#[derive(Debug, Clone)]
pub struct UdpOutbound {
    socket: Arc<UdpSocket>,
}

impl Outbound<SocketAddr> for UdpOutbound {
    fn send(&self, member: &SocketAddr, _room_id: &str, payload: Bytes) -> Result<(), DeliveryError> {
        match self.socket.try_send_to(&payload, *member) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(DeliveryError::Full),
            Err(e) => Err(DeliveryError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::{FrameRouter, Registry, VIDEOROOM_NAMESPACE};
    use fanout_protocol::envelope;
    use std::time::Duration;

    fn loopback() -> UdpConfig {
        UdpConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    #[test]
    fn test_udp_config_default() {
        let config = UdpConfig::default();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.max_datagram_size, MAX_DATAGRAM_SIZE);
    }

    #[tokio::test]
    async fn test_relay_between_endpoints() {
        let relay = UdpTransport::bind(loopback()).await.unwrap();
        let relay_addr = relay.local_addr().unwrap();

        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());

        let router = FrameRouter::new(
            Arc::new(Registry::<SocketAddr, ByValue>::new()),
            relay.outbound(),
            VIDEOROOM_NAMESPACE,
        );
        router.registry().join("videoroom:r1", a_addr);
        router.registry().join("videoroom:r1", b_addr);

        a.send_to(&envelope::encode(b"hello", "r1").unwrap(), relay_addr)
            .await
            .unwrap();

        let mut buf = Vec::new();
        let (frame, from) = relay.recv(&mut buf).await.unwrap();
        assert_eq!(from, a_addr);
        let report = router.route_frame(&from, frame).unwrap();
        assert_eq!(report.delivered, 1);

        let mut got = [0u8; 64];
        let (len, src) = tokio::time::timeout(Duration::from_secs(2), b.recv_from(&mut got))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..len], b"hello");
        assert_eq!(src, relay_addr);

        // The sender gets nothing back.
        let echoed = tokio::time::timeout(Duration::from_millis(100), a.recv_from(&mut got)).await;
        assert!(echoed.is_err());
    }

    #[tokio::test]
    async fn test_oversized_datagram_rejected() {
        let relay = UdpTransport::bind(UdpConfig {
            max_datagram_size: 8,
            ..loopback()
        })
        .await
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&[0u8; 32], relay.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = Vec::new();
        assert!(matches!(
            relay.recv(&mut buf).await,
            Err(TransportError::MessageTooLarge { size: 9, max: 8 })
        ));
    }
}
