//! Room naming.
//!
//! Clients name rooms by a bare id (`"abc"`); the registry stores them under
//! a namespaced key (`"videoroom:abc"`) so several kinds of rooms could share
//! one registry without colliding.

use fanout_protocol::envelope::MAX_ROOM_ID_LENGTH;

/// Namespace for video rooms.
pub const VIDEOROOM_NAMESPACE: &str = "videoroom:";

/// A namespaced room key, as stored in the registry.
pub type RoomKey = String;

/// Build the registry key for a room id.
#[must_use]
pub fn room_key(namespace: &str, room_id: &str) -> RoomKey {
    let mut key = String::with_capacity(namespace.len() + room_id.len());
    key.push_str(namespace);
    key.push_str(room_id);
    key
}

/// Validate a client-supplied room id.
///
/// Room ids must fit the data envelope, otherwise members could join a room
/// they can never send frames to.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    if room_id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if room_id.chars().any(char::is_control) {
        return Err("Room id contains control characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_key() {
        let key = room_key(VIDEOROOM_NAMESPACE, "abc");
        assert_eq!(key, "videoroom:abc");
    }

    #[test]
    fn test_room_id_validation() {
        assert!(validate_room_id("abc").is_ok());
        assert!(validate_room_id("ünïcødé").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("a\nb").is_err());
        assert!(validate_room_id(&"a".repeat(MAX_ROOM_ID_LENGTH)).is_ok());
        assert!(validate_room_id(&"a".repeat(MAX_ROOM_ID_LENGTH + 1)).is_err());
    }
}
