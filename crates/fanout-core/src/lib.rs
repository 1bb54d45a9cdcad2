//! # fanout-core
//!
//! Transport-agnostic relay logic for the Fanout room relay.
//!
//! - **Registry** - room membership, generic over a member equality rule
//! - **FrameRouter** - decodes data frames and fans them out to the room
//! - **Admission / Session** - authorized join, leave, and teardown
//! - **Authorizer** - contract for the external slot/identity service
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  frame  ┌─────────────┐ members ┌─────────────┐
//! │  Transport  │────────▶│ FrameRouter │────────▶│  Registry   │
//! └─────────────┘         └─────────────┘         └─────────────┘
//!        │ control                                       ▲
//!        ▼                                               │ join/leave
//! ┌─────────────┐      authorize      ┌─────────────┐    │
//! │   Session   │────────────────────▶│  Authorizer │    │
//! └─────────────┘                     └─────────────┘    │
//!        └───────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod identity;
pub mod registry;
pub mod room;
pub mod router;
pub mod session;

pub use auth::{AuthError, Authorizer, Identity, SlotOwner, StaticAuthorizer};
pub use identity::{ByIdentity, ByValue, ConnectionId, Equality, Identified};
pub use registry::{Registry, RegistryStats};
pub use room::{room_key, RoomKey, VIDEOROOM_NAMESPACE};
pub use router::{DeliveryError, FrameRouter, Outbound, RouteReport};
pub use session::{join_reply, Admission, Admitted, JoinError, Session};
