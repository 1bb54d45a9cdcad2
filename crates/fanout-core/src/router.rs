//! Frame router.
//!
//! Fans a frame out to every other member of its room. Routing is
//! synchronous and best-effort: each member gets an independent send, and a
//! failed send never stops delivery to the rest of the room.

use crate::identity::Equality;
use crate::registry::Registry;
use crate::room::{room_key, RoomKey};
use bytes::Bytes;
use fanout_protocol::envelope::{self, EnvelopeError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Why a single delivery failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The member's connection is gone.
    #[error("Member connection closed")]
    Closed,

    /// The member's outbound queue is full; the frame was dropped.
    #[error("Member queue full")]
    Full,

    /// I/O error from the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The send capability a transport provides to the router.
///
/// Implementations must not block: the router calls `send` once per member
/// per frame.
pub trait Outbound<M>: Send + Sync {
    /// Send a payload relayed in `room_id` to one member.
    fn send(&self, member: &M, room_id: &str, payload: Bytes) -> Result<(), DeliveryError>;
}

impl<M, O: Outbound<M> + ?Sized> Outbound<M> for Arc<O> {
    fn send(&self, member: &M, room_id: &str, payload: Bytes) -> Result<(), DeliveryError> {
        (**self).send(member, room_id, payload)
    }
}

/// Outcome of routing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    /// Room the frame was routed in.
    pub room: RoomKey,
    /// Members other than the originator.
    pub recipients: usize,
    /// Successful sends.
    pub delivered: usize,
    /// Failed sends.
    pub failed: usize,
}

/// Routes frames between the members of a registry.
pub struct FrameRouter<M, E: Equality<M>, O> {
    registry: Arc<Registry<M, E>>,
    outbound: O,
    namespace: String,
}

impl<M, E, O> FrameRouter<M, E, O>
where
    M: Clone + Send + Sync + 'static,
    E: Equality<M>,
    O: Outbound<M>,
{
    /// Create a router over a registry, sending through `outbound`.
    #[must_use]
    pub fn new(registry: Arc<Registry<M, E>>, outbound: O, namespace: impl Into<String>) -> Self {
        Self {
            registry,
            outbound,
            namespace: namespace.into(),
        }
    }

    /// Get the registry this router reads.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry<M, E>> {
        &self.registry
    }

    /// Get the room namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Decode an envelope frame from `origin` and relay its payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed. Nothing is delivered in
    /// that case; callers drop the frame and keep the connection open.
    pub fn route_frame(&self, origin: &M, frame: Bytes) -> Result<RouteReport, EnvelopeError> {
        let envelope = envelope::decode(frame)?;
        Ok(self.route(origin, &envelope.room_id, envelope.payload))
    }

    /// Relay a payload from `origin` to every other member of a room.
    pub fn route(&self, origin: &M, room_id: &str, payload: Bytes) -> RouteReport {
        let room = room_key(&self.namespace, room_id);
        let origin_key = E::key(origin);

        let mut report = RouteReport {
            room,
            recipients: 0,
            delivered: 0,
            failed: 0,
        };

        for member in self.registry.members_of(&report.room) {
            if E::key(&member) == origin_key {
                continue;
            }

            report.recipients += 1;
            match self.outbound.send(&member, room_id, payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(room = %report.room, error = %e, "Delivery failed");
                }
            }
        }

        trace!(
            room = %report.room,
            recipients = report.recipients,
            delivered = report.delivered,
            bytes = payload.len(),
            "Routed frame"
        );

        report
    }
}
