//! Authorization contract.
//!
//! The relay does not own slot assignments or identities. An [`Authorizer`]
//! answers two questions: who owns a slot, and who a token belongs to. A
//! caller may occupy a slot only when both answers name the same user.

use async_trait::async_trait;
use fanout_protocol::control::{JoinRequest, Slot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// The user a slot is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOwner {
    pub uid: String,
}

/// A verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
}

/// Reasons a join is denied.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Nobody is assigned to the slot.
    #[error("Slot {slot} of room {videoroom_id} is unassigned")]
    SlotUnassigned { videoroom_id: String, slot: String },

    /// The identity token failed verification.
    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    /// The caller is not the slot's owner.
    #[error("Caller {caller} does not own the slot")]
    IdentityMismatch { caller: String },

    /// The authorization service could not be reached or answered badly.
    #[error("Authorization service unavailable: {0}")]
    Unavailable(String),
}

/// External authorization collaborator.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Look up the owner of a slot. `None` means the slot is unassigned.
    async fn resolve_slot(
        &self,
        videoroom_id: &str,
        slot: &Slot,
    ) -> Result<Option<SlotOwner>, AuthError>;

    /// Verify an identity token.
    async fn verify_identity(&self, id_token: &str) -> Result<Identity, AuthError>;
}

/// Decide whether a join request may proceed.
///
/// # Errors
///
/// Returns the reason for denial. Every error, including an unreachable
/// service, means "deny".
pub async fn authorize(
    authorizer: &dyn Authorizer,
    request: &JoinRequest,
) -> Result<Identity, AuthError> {
    let owner = authorizer
        .resolve_slot(&request.videoroom_id, &request.slot)
        .await?
        .ok_or_else(|| AuthError::SlotUnassigned {
            videoroom_id: request.videoroom_id.clone(),
            slot: request.slot.to_string(),
        })?;

    let identity = authorizer.verify_identity(&request.id_token).await?;

    if identity.uid != owner.uid {
        return Err(AuthError::IdentityMismatch {
            caller: identity.uid,
        });
    }

    debug!(videoroom = %request.videoroom_id, slot = %request.slot, uid = %identity.uid, "Authorized");
    Ok(identity)
}

/// In-memory authorizer backed by fixed tables.
///
/// Used for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    /// (room id, slot) -> owner uid.
    slots: HashMap<(String, String), String>,
    /// token -> uid.
    tokens: HashMap<String, String>,
}

impl StaticAuthorizer {
    /// Create an empty authorizer that denies everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a slot to a user.
    #[must_use]
    pub fn with_slot(
        mut self,
        videoroom_id: impl Into<String>,
        slot: impl Into<Slot>,
        uid: impl Into<String>,
    ) -> Self {
        self.slots
            .insert((videoroom_id.into(), slot.into().to_string()), uid.into());
        self
    }

    /// Register a token that verifies as a user.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, uid: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), uid.into());
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn resolve_slot(
        &self,
        videoroom_id: &str,
        slot: &Slot,
    ) -> Result<Option<SlotOwner>, AuthError> {
        let key = (videoroom_id.to_string(), slot.to_string());
        Ok(self
            .slots
            .get(&key)
            .map(|uid| SlotOwner { uid: uid.clone() }))
    }

    async fn verify_identity(&self, id_token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(id_token)
            .map(|uid| Identity { uid: uid.clone() })
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }
}
