//! Frame types for the pub/sub transport.
//!
//! On the pub/sub path the room id travels as a frame field instead of an
//! envelope suffix, and control and data share one MessagePack stream.

use serde::{Deserialize, Serialize};

use crate::control::{ControlReply, Slot};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Join = 0x01,
    Leave = 0x02,
    Publish = 0x03,
    Reply = 0x04,
    Error = 0x05,
    Ping = 0x06,
    Pong = 0x07,
}

/// A pub/sub protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Join a room, subject to authorization.
    #[serde(rename = "join")]
    Join {
        /// Request ID echoed in the reply.
        id: u64,
        videoroom_id: String,
        slot: Slot,
        id_token: String,
    },

    /// Leave a room.
    #[serde(rename = "leave")]
    Leave { id: u64, videoroom_id: String },

    /// Data for every other member of a room.
    #[serde(rename = "publish")]
    Publish {
        videoroom_id: String,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Outcome of a join or leave.
    #[serde(rename = "reply")]
    Reply { id: u64, reply: ControlReply },

    /// Frame-level error (undecodable or unexpected frame).
    #[serde(rename = "error")]
    Error { code: u16, message: String },

    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Reply { .. } => FrameType::Reply,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(
        id: u64,
        videoroom_id: impl Into<String>,
        slot: impl Into<Slot>,
        id_token: impl Into<String>,
    ) -> Self {
        Frame::Join {
            id,
            videoroom_id: videoroom_id.into(),
            slot: slot.into(),
            id_token: id_token.into(),
        }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(id: u64, videoroom_id: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            videoroom_id: videoroom_id.into(),
        }
    }

    /// Create a new Publish frame.
    #[must_use]
    pub fn publish(videoroom_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            videoroom_id: videoroom_id.into(),
            payload: payload.into(),
        }
    }

    /// Create a new Reply frame.
    #[must_use]
    pub fn reply(id: u64, reply: ControlReply) -> Self {
        Frame::Reply { id, reply }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// The frame could not be decoded.
    pub const INVALID_FRAME: u16 = 1001;
    /// The frame is valid but not accepted from clients.
    pub const UNEXPECTED_FRAME: u16 = 1002;
}
