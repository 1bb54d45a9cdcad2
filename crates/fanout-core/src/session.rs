//! Join/leave lifecycle.
//!
//! Joining happens in two phases: authorize (may suspend on the network),
//! then mutate the registry (never suspends). [`Admission::admit_owned`]
//! yields the first phase as a `'static` future so a connection loop can keep
//! relaying while it is pending, and [`Admitted::commit`] applies the second.
//! Registry mutations are idempotent, so a leave that overtakes a pending join
//! is a no-op and a repeated join changes nothing.

use crate::auth::{authorize, AuthError, Authorizer};
use crate::identity::Equality;
use crate::registry::Registry;
use crate::room::{room_key, validate_room_id, RoomKey};
use fanout_protocol::control::{ControlReply, JoinRequest};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a join was rejected.
#[derive(Debug, Error)]
pub enum JoinError {
    /// The room id cannot be used.
    #[error("Invalid room id: {0}")]
    InvalidRoom(&'static str),

    /// The authorizer denied the caller.
    #[error("Authorization denied: {0}")]
    Denied(#[from] AuthError),
}

/// Admits members into rooms after authorization.
pub struct Admission {
    authorizer: Arc<dyn Authorizer>,
    namespace: String,
}

impl Admission {
    /// Create an admission controller for rooms under `namespace`.
    #[must_use]
    pub fn new(authorizer: Arc<dyn Authorizer>, namespace: impl Into<String>) -> Self {
        Self {
            authorizer,
            namespace: namespace.into(),
        }
    }

    /// Get the room namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Authorize a join request without touching any registry.
    ///
    /// Returns the key of the room the caller may join.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or authorization fails.
    pub async fn admit(&self, request: &JoinRequest) -> Result<RoomKey, JoinError> {
        validate_room_id(&request.videoroom_id).map_err(JoinError::InvalidRoom)?;

        authorize(self.authorizer.as_ref(), request).await?;

        Ok(room_key(&self.namespace, &request.videoroom_id))
    }

    /// Authorize an owned request. The future borrows nothing, so it can be
    /// polled alongside other work and dropped with its connection.
    pub fn admit_owned(
        self: Arc<Self>,
        request: JoinRequest,
    ) -> impl Future<Output = Admitted> + Send + 'static {
        async move {
            let result = self.admit(&request).await;
            Admitted { request, result }
        }
    }

    /// Authorize a join request, then add `member` to the room.
    ///
    /// Returns the key of the joined room.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or authorization fails. The
    /// registry is untouched in that case.
    pub async fn join<M, E>(
        &self,
        registry: &Registry<M, E>,
        request: &JoinRequest,
        member: M,
    ) -> Result<RoomKey, JoinError>
    where
        M: Clone + Send + Sync + 'static,
        E: Equality<M>,
    {
        let key = self.admit(request).await?;
        registry.join(&key, member);
        Ok(key)
    }

    /// Remove `member` from a room. Unknown rooms and members are ignored.
    pub fn leave<M, E>(&self, registry: &Registry<M, E>, videoroom_id: &str, member: &M) -> RoomKey
    where
        M: Clone + Send + Sync + 'static,
        E: Equality<M>,
    {
        let key = room_key(&self.namespace, videoroom_id);
        registry.leave(&key, member);
        key
    }
}

/// A join request whose authorization has finished.
#[derive(Debug)]
pub struct Admitted {
    pub request: JoinRequest,
    pub result: Result<RoomKey, JoinError>,
}

impl Admitted {
    /// Add `member` to the room if the join was authorized.
    ///
    /// Returns the reply for the client.
    pub fn commit<M, E>(&self, registry: &Registry<M, E>, member: M) -> ControlReply
    where
        M: Clone + Send + Sync + 'static,
        E: Equality<M>,
    {
        if let Ok(key) = &self.result {
            registry.join(key, member);
        }
        join_reply(&self.request, &self.result)
    }
}

/// Turn a join outcome into the control reply sent to the client.
#[must_use]
pub fn join_reply(request: &JoinRequest, result: &Result<RoomKey, JoinError>) -> ControlReply {
    match result {
        Ok(room) => {
            info!(room = %room, slot = %request.slot, "Join accepted");
            ControlReply::joined(request.videoroom_id.clone(), request.slot.clone())
        }
        Err(e) => {
            warn!(videoroom = %request.videoroom_id, slot = %request.slot, error = %e, "Join rejected");
            ControlReply::Error
        }
    }
}

/// Membership of one connection-oriented member.
///
/// Remembers every room the member joined and leaves all of them when the
/// session is dropped, so a closed connection never lingers in a room.
pub struct Session<M, E>
where
    M: Clone + Send + Sync + 'static,
    E: Equality<M>,
{
    admission: Arc<Admission>,
    registry: Arc<Registry<M, E>>,
    member: M,
    rooms: HashSet<RoomKey>,
}

impl<M, E> Session<M, E>
where
    M: Clone + Send + Sync + 'static,
    E: Equality<M>,
{
    /// Start a session for `member`.
    #[must_use]
    pub fn new(admission: Arc<Admission>, registry: Arc<Registry<M, E>>, member: M) -> Self {
        Self {
            admission,
            registry,
            member,
            rooms: HashSet::new(),
        }
    }

    /// Get the session's member.
    #[must_use]
    pub fn member(&self) -> &M {
        &self.member
    }

    /// Get the rooms joined through this session.
    pub fn rooms(&self) -> impl Iterator<Item = &RoomKey> {
        self.rooms.iter()
    }

    /// Get the admission controller this session joins through.
    #[must_use]
    pub fn admission(&self) -> &Arc<Admission> {
        &self.admission
    }

    /// Apply a finished authorization to this session's member.
    ///
    /// Pair with [`Admission::admit_owned`] to keep the session usable while
    /// authorization is pending.
    pub fn commit(&mut self, admitted: &Admitted) -> ControlReply {
        let reply = admitted.commit(&*self.registry, self.member.clone());
        if let Ok(room) = &admitted.result {
            self.rooms.insert(room.clone());
        }
        reply
    }

    /// Handle a join request for this session's member.
    pub async fn join(&mut self, request: &JoinRequest) -> ControlReply {
        let admitted = Arc::clone(&self.admission)
            .admit_owned(request.clone())
            .await;
        self.commit(&admitted)
    }

    /// Handle a leave request for this session's member.
    pub fn leave(&mut self, videoroom_id: &str) -> ControlReply {
        let room = self
            .admission
            .leave(&*self.registry, videoroom_id, &self.member);
        self.rooms.remove(&room);
        ControlReply::left(videoroom_id)
    }
}

impl<M, E> Drop for Session<M, E>
where
    M: Clone + Send + Sync + 'static,
    E: Equality<M>,
{
    fn drop(&mut self) {
        let count = self.rooms.len();
        for room in self.rooms.drain() {
            self.registry.leave(&room, &self.member);
        }
        if count > 0 {
            debug!(rooms = count, "Session closed, left rooms");
        }
    }
}
