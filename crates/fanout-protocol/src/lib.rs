//! # fanout-protocol
//!
//! Wire formats for the Fanout room relay.
//!
//! - [`envelope`] - binary data frames that carry their room id at the tail,
//!   shared by the UDP and WebSocket paths
//! - [`control`] - JSON join/leave messages and replies
//! - [`frames`] / [`codec`] - MessagePack frames for the pub/sub path
//!
//! ## Example
//!
//! ```rust
//! use fanout_protocol::envelope;
//!
//! let frame = envelope::encode(b"hello", "r1").unwrap();
//! let decoded = envelope::decode(frame).unwrap();
//! assert_eq!(decoded.room_id, "r1");
//! assert_eq!(&decoded.payload[..], b"hello");
//! ```

pub mod codec;
pub mod control;
pub mod envelope;
pub mod frames;

pub use codec::ProtocolError;
pub use control::{ControlCommand, ControlReply, JoinRequest, LeaveRequest, Slot};
pub use envelope::{Envelope, EnvelopeError, MalformedFrame};
pub use frames::Frame;
