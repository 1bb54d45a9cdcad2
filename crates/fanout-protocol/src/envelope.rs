//! Envelope codec for relayed data frames.
//!
//! A data frame names its room at the tail, so the relay can route it
//! without looking at the payload:
//!
//! ```text
//! [ payload bytes ][ room id (UTF-8) ][ 1 byte: room id length ]
//! ```
//!
//! The same envelope is used for UDP datagrams and WebSocket binary messages.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum encoded room id length in bytes (limited by the one-byte suffix).
pub const MAX_ROOM_ID_LENGTH: usize = u8::MAX as usize;

/// Length suffix size in bytes.
pub const LENGTH_SUFFIX_SIZE: usize = 1;

/// Why a frame could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedFrame {
    /// The frame has no bytes at all, not even the length suffix.
    #[error("frame is empty")]
    Empty,

    /// The length suffix claims more room id bytes than precede it.
    #[error("room id length {claimed} exceeds the {available} bytes before the suffix")]
    LengthOutOfRange { claimed: usize, available: usize },

    /// The room id bytes are not valid UTF-8.
    #[error("room id is not valid UTF-8")]
    InvalidUtf8,
}

/// Envelope errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Inbound frame cannot be decoded. Such frames are dropped.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] MalformedFrame),

    /// Room id does not fit the one-byte length suffix.
    #[error("Room id is {0} bytes, maximum is 255")]
    RoomIdTooLong(usize),
}

/// A decoded data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Room id as sent by the client, without namespace.
    pub room_id: String,
    /// Opaque payload to relay.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(room_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            room_id: room_id.into(),
            payload: payload.into(),
        }
    }

    /// Encode this envelope to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is longer than [`MAX_ROOM_ID_LENGTH`] bytes.
    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        encode(&self.payload, &self.room_id)
    }
}

/// Encode a payload for a room.
///
/// # Errors
///
/// Returns an error if the room id is longer than [`MAX_ROOM_ID_LENGTH`] bytes.
pub fn encode(payload: &[u8], room_id: &str) -> Result<Bytes, EnvelopeError> {
    let mut buf = BytesMut::with_capacity(payload.len() + room_id.len() + LENGTH_SUFFIX_SIZE);
    encode_into(payload, room_id, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a payload for a room into an existing buffer.
///
/// # Errors
///
/// Returns an error if the room id is longer than [`MAX_ROOM_ID_LENGTH`] bytes.
pub fn encode_into(payload: &[u8], room_id: &str, buf: &mut BytesMut) -> Result<(), EnvelopeError> {
    let id = room_id.as_bytes();
    let id_len = u8::try_from(id.len()).map_err(|_| EnvelopeError::RoomIdTooLong(id.len()))?;

    buf.reserve(payload.len() + id.len() + LENGTH_SUFFIX_SIZE);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(id);
    buf.put_u8(id_len);

    Ok(())
}

/// Decode a frame into its room id and payload.
///
/// The payload is a zero-copy slice of `frame`.
///
/// # Errors
///
/// Returns [`EnvelopeError::Malformed`] if the length suffix is inconsistent
/// with the frame size or the room id is not UTF-8.
pub fn decode(frame: Bytes) -> Result<Envelope, EnvelopeError> {
    let (payload_end, room_id) = split(&frame)?;
    let room_id = room_id.to_owned();

    Ok(Envelope {
        room_id,
        payload: frame.slice(..payload_end),
    })
}

fn split(frame: &[u8]) -> Result<(usize, &str), MalformedFrame> {
    let (&id_len, rest) = frame.split_last().ok_or(MalformedFrame::Empty)?;
    let id_len = usize::from(id_len);

    if id_len > rest.len() {
        return Err(MalformedFrame::LengthOutOfRange {
            claimed: id_len,
            available: rest.len(),
        });
    }

    let payload_end = rest.len() - id_len;
    let room_id =
        std::str::from_utf8(&rest[payload_end..]).map_err(|_| MalformedFrame::InvalidUtf8)?;

    Ok((payload_end, room_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let encoded = encode(b"hello", "r1").unwrap();
        assert_eq!(&encoded[..], b"hellor1\x02");
    }

    #[test]
    fn test_roundtrip_payload_sizes() {
        let room_ids = ["r1", "", "ünïcødé-room", "a"];

        for room_id in room_ids {
            for len in [0usize, 1, 2, 17, 128, 250] {
                let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                let encoded = encode(&payload, room_id).unwrap();
                let decoded = decode(encoded).unwrap();
                assert_eq!(decoded.room_id, room_id);
                assert_eq!(&decoded.payload[..], &payload[..]);
            }
        }
    }

    #[test]
    fn test_roundtrip_max_room_id() {
        let room_id = "x".repeat(MAX_ROOM_ID_LENGTH);
        let envelope = Envelope::new(room_id.clone(), b"data".to_vec());
        let decoded = decode(envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_room_id_too_long() {
        let room_id = "x".repeat(MAX_ROOM_ID_LENGTH + 1);
        assert_eq!(
            encode(b"data", &room_id),
            Err(EnvelopeError::RoomIdTooLong(MAX_ROOM_ID_LENGTH + 1))
        );

        // Multi-byte characters count in bytes, not chars.
        let room_id = "é".repeat(128);
        assert!(matches!(
            encode(b"", &room_id),
            Err(EnvelopeError::RoomIdTooLong(256))
        ));
    }

    #[test]
    fn test_decode_length_exceeds_frame() {
        match decode(Bytes::from_static(&[5])) {
            Err(EnvelopeError::Malformed(MalformedFrame::LengthOutOfRange {
                claimed: 5,
                available: 0,
            })) => {}
            other => panic!("Expected LengthOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_frame() {
        assert_eq!(
            decode(Bytes::new()),
            Err(EnvelopeError::Malformed(MalformedFrame::Empty))
        );
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let frame = Bytes::from_static(&[b'p', 0xff, 0xfe, 2]);
        assert_eq!(
            decode(frame),
            Err(EnvelopeError::Malformed(MalformedFrame::InvalidUtf8))
        );
    }

    #[test]
    fn test_decode_id_fills_frame() {
        // No payload, whole prefix is the room id.
        let decoded = decode(Bytes::from_static(b"abc\x03")).unwrap();
        assert_eq!(decoded.room_id, "abc");
        assert!(decoded.payload.is_empty());

        // Zero-length room id.
        let decoded = decode(Bytes::from_static(b"abc\x00")).unwrap();
        assert_eq!(decoded.room_id, "");
        assert_eq!(&decoded.payload[..], b"abc");
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        encode_into(b"a", "x", &mut buf).unwrap();
        encode_into(b"b", "y", &mut buf).unwrap();
        assert_eq!(&buf[..], b"ax\x01by\x01");
    }
}
