//! # fanout-transport
//!
//! Transport adapters for the Fanout relay.
//!
//! - **UDP** - members are `(address, port)` endpoints, compared by value
//! - **WebSocket** - members are live connections, compared by identity
//! - **Pub/sub** - like WebSocket, but speaking MessagePack frames
//!
//! Each adapter implements [`Transport`], naming its member type, its
//! equality rule and its send capability. The server builds one registry and
//! one router per transport from those types:
//!
//! ```rust,ignore
//! use fanout_transport::{RouterFor, UdpTransport};
//!
//! let udp = UdpTransport::bind(config).await?;
//! let router: RouterFor<UdpTransport> =
//!     FrameRouter::new(Arc::new(Registry::new()), udp.outbound(), VIDEOROOM_NAMESPACE);
//! ```

pub mod connection;
pub mod traits;
pub mod udp;

pub use connection::{
    Outgoing, Peer, PeerOutbound, PubSubTransport, WebSocketTransport, DEFAULT_QUEUE_CAPACITY,
};
pub use traits::{RegistryFor, RouterFor, Transport, TransportError};
pub use udp::{UdpConfig, UdpOutbound, UdpTransport, MAX_DATAGRAM_SIZE};
