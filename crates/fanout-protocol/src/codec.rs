//! Codec for pub/sub frames.
//!
//! Frames are MessagePack maps. WebSocket messages already delimit frames,
//! so there is no length prefix: one message carries exactly one frame.

use bytes::Bytes;
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Control message is not valid JSON.
    #[error("Invalid control message: {0}")]
    Json(#[from] serde_json::Error),

    /// Control message lacks a field its action needs.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let data = rmp_serde::to_vec_named(frame)?;

    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(Bytes::from(data))
}

/// Decode a frame from one message.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid frame.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(rmp_serde::from_slice(data)?)
}
