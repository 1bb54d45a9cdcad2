//! Control-plane messages.
//!
//! Control messages travel as JSON text over the reliable control channel
//! (the WebSocket connection), separate from binary data frames:
//!
//! ```json
//! { "videoroomId": "abc", "slot": 2, "idToken": "...", "datagramPort": 40000 }
//! ```
//!
//! Replies are `{ "status": "ok", "videoroomId": "abc", "slot": 2 }` or
//! `{ "status": "error" }`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::ProtocolError;

/// A slot within a room. Clients may send it as a JSON string or number;
/// replies echo it back in the same form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Slot {
    Number(i64),
    Text(String),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Number(n) => write!(f, "{}", n),
            Slot::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Slot {
    fn from(n: i64) -> Self {
        Slot::Number(n)
    }
}

impl From<&str> for Slot {
    fn from(s: &str) -> Self {
        Slot::Text(s.to_string())
    }
}

impl From<String> for Slot {
    fn from(s: String) -> Self {
        Slot::Text(s)
    }
}

/// Requested control action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    #[default]
    Join,
    Leave,
}

/// Raw control message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    /// Action, `join` when absent.
    #[serde(default)]
    pub action: ControlAction,
    /// Room id without namespace.
    pub videoroom_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<Slot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// UDP port to deliver datagrams to. Absent means the WebSocket
    /// connection itself is the member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datagram_port: Option<u16>,
}

/// A request to occupy a slot in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub videoroom_id: String,
    pub slot: Slot,
    pub id_token: String,
    pub datagram_port: Option<u16>,
}

/// A request to leave a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRequest {
    pub videoroom_id: String,
    pub datagram_port: Option<u16>,
}

/// A validated control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Join(JoinRequest),
    Leave(LeaveRequest),
}

impl ControlMessage {
    /// Validate the message into a command.
    ///
    /// # Errors
    ///
    /// Returns an error if a join lacks its slot or identity token.
    pub fn into_command(self) -> Result<ControlCommand, ProtocolError> {
        match self.action {
            ControlAction::Join => {
                let slot = self.slot.ok_or(ProtocolError::MissingField("slot"))?;
                let id_token = self.id_token.ok_or(ProtocolError::MissingField("idToken"))?;
                Ok(ControlCommand::Join(JoinRequest {
                    videoroom_id: self.videoroom_id,
                    slot,
                    id_token,
                    datagram_port: self.datagram_port,
                }))
            }
            ControlAction::Leave => Ok(ControlCommand::Leave(LeaveRequest {
                videoroom_id: self.videoroom_id,
                datagram_port: self.datagram_port,
            })),
        }
    }
}

/// Parse a JSON control message.
///
/// # Errors
///
/// Returns an error if the text is not a valid control message.
pub fn parse(text: &str) -> Result<ControlCommand, ProtocolError> {
    let message: ControlMessage = serde_json::from_str(text)?;
    message.into_command()
}

/// Reply to a control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ControlReply {
    Ok {
        #[serde(rename = "videoroomId")]
        videoroom_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<Slot>,
    },
    Error,
}

impl ControlReply {
    /// Reply accepting a join.
    #[must_use]
    pub fn joined(videoroom_id: impl Into<String>, slot: Slot) -> Self {
        ControlReply::Ok {
            videoroom_id: videoroom_id.into(),
            slot: Some(slot),
        }
    }

    /// Reply accepting a leave.
    #[must_use]
    pub fn left(videoroom_id: impl Into<String>) -> Self {
        ControlReply::Ok {
            videoroom_id: videoroom_id.into(),
            slot: None,
        }
    }

    /// Check whether this reply accepts the request.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, ControlReply::Ok { .. })
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
