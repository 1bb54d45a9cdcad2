//! Connection-oriented members (WebSocket and pub/sub).
//!
//! A connection's socket is owned by its own task. Other tasks reach it
//! through a bounded queue held by [`Peer`]; the router pushes into that
//! queue without waiting, and the connection task drains it onto the wire.

use bytes::Bytes;
use fanout_core::{ByIdentity, ConnectionId, DeliveryError, Identified, Outbound};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::Transport;

/// Default capacity of a peer's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A relayed payload waiting to be written to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Room the payload was relayed in.
    pub room_id: String,
    /// Opaque payload.
    pub payload: Bytes,
}

/// Handle to a live connection.
///
/// Clones refer to the same connection and compare equal under
/// [`ByIdentity`].
#[derive(Debug, Clone)]
pub struct Peer {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    tx: mpsc::Sender<Outgoing>,
}

impl Peer {
    /// Create a peer handle and the receiving end of its queue.
    #[must_use]
    pub fn channel(
        capacity: usize,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let peer = Self {
            id: ConnectionId::next(),
            remote_addr,
            tx,
        };
        (peer, rx)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the remote address, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl Identified for Peer {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

/// Sends to peers by queueing on their channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerOutbound;

impl Outbound<Peer> for PeerOutbound {
    fn send(&self, member: &Peer, room_id: &str, payload: Bytes) -> Result<(), DeliveryError> {
        let outgoing = Outgoing {
            room_id: room_id.to_string(),
            payload,
        };
        member.tx.try_send(outgoing).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                trace!(conn = %member.id, "Peer queue full, dropping frame");
                DeliveryError::Full
            }
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// WebSocket members: one per connection, binary messages are envelope frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    const NAME: &'static str = "websocket";
    type Member = Peer;
    type Equality = ByIdentity;
    type Outbound = PeerOutbound;
}

/// Pub/sub members: one per connection, speaking MessagePack frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct PubSubTransport;

impl Transport for PubSubTransport {
    const NAME: &'static str = "pubsub";
    type Member = Peer;
    type Equality = ByIdentity;
    type Outbound = PeerOutbound;
}
