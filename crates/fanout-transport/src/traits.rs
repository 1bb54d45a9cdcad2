//! Transport abstraction.
//!
//! A transport contributes exactly what the relay core needs: what a member
//! is, when two members are the same, and how to send to one. Everything else
//! (sockets, upgrades, framing of control messages) stays in the adapter.

use fanout_core::{Equality, FrameRouter, Outbound, Registry};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Datagram or message exceeds the configured maximum.
    #[error("Message of {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The capability set a transport hands to the relay core.
pub trait Transport {
    /// Transport name, used in logs and metric labels.
    const NAME: &'static str;

    /// A room member on this transport.
    type Member: Clone + Send + Sync + 'static;

    /// When two members are the same member.
    type Equality: Equality<Self::Member>;

    /// How to send to a member.
    type Outbound: Outbound<Self::Member>;
}

/// Registry of members of transport `T`.
pub type RegistryFor<T> = Registry<<T as Transport>::Member, <T as Transport>::Equality>;

/// Frame router for transport `T`.
pub type RouterFor<T> = FrameRouter<
    <T as Transport>::Member,
    <T as Transport>::Equality,
    <T as Transport>::Outbound,
>;
