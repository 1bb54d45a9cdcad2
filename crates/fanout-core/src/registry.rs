//! Room registry.
//!
//! Maps room keys to their current members. Rooms are created by the first
//! join and removed as soon as their last member leaves, so an empty room and
//! an unknown room look the same to callers.
//!
//! The registry is shared between connection tasks on a multi-threaded
//! runtime. Rooms live in a sharded `DashMap`, which serializes mutations of
//! any one room while letting unrelated rooms proceed in parallel.
//!
//! The reverse index is only updated while the room's entry is held, and
//! always in that order (room, then reverse index), so a member's index entry
//! never disagrees with the rooms that actually hold it.

use crate::identity::Equality;
use crate::room::RoomKey;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A member stored in a room, with its last activity time.
#[derive(Debug, Clone)]
struct MemberEntry<M> {
    member: M,
    last_seen: Instant,
}

impl<M> MemberEntry<M> {
    fn new(member: M) -> Self {
        Self {
            member,
            last_seen: Instant::now(),
        }
    }
}

type Members<M, K> = HashMap<K, MemberEntry<M>>;

/// Room membership, generic over the member type and its equality rule.
pub struct Registry<M, E: Equality<M>> {
    /// Members indexed by room key.
    rooms: DashMap<RoomKey, Members<M, E::Key>>,
    /// Reverse index (member key -> rooms joined), for teardown and touch.
    memberships: DashMap<E::Key, HashSet<RoomKey>>,
    _equality: PhantomData<fn() -> E>,
}

impl<M, E> Registry<M, E>
where
    M: Clone + Send + Sync + 'static,
    E: Equality<M>,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            _equality: PhantomData,
        }
    }

    /// Add a member to a room, creating the room if needed.
    ///
    /// Joining twice is harmless: the member is stored once and its activity
    /// time is refreshed. Returns `true` if the member was not yet in the room.
    pub fn join(&self, room: &str, member: M) -> bool {
        let key = E::key(&member);

        let added = {
            let mut members = self.rooms.entry(room.to_string()).or_insert_with(|| {
                debug!(room = %room, "Creating room");
                HashMap::new()
            });

            match members.get_mut(&key) {
                Some(entry) => {
                    entry.last_seen = Instant::now();
                    false
                }
                None => {
                    members.insert(key.clone(), MemberEntry::new(member));
                    self.memberships
                        .entry(key.clone())
                        .or_default()
                        .insert(room.to_string());
                    true
                }
            }
        };

        if added {
            debug!(room = %room, member = ?key, members = self.member_count(room), "Joined");
        } else {
            trace!(room = %room, member = ?key, "Already joined");
        }

        added
    }

    /// Remove a member from a room.
    ///
    /// Does nothing if the room or member is unknown. Returns `true` if the
    /// member was removed.
    pub fn leave(&self, room: &str, member: &M) -> bool {
        let key = E::key(member);

        if self.remove_member(room, &key, |_| true).is_none() {
            return false;
        }

        debug!(room = %room, member = ?key, "Left");
        true
    }

    /// Remove a member from every room it joined.
    ///
    /// Returns the keys of the rooms it was removed from.
    pub fn leave_all(&self, member: &M) -> Vec<RoomKey> {
        let key = E::key(member);

        let Some((_, rooms)) = self.memberships.remove(&key) else {
            return Vec::new();
        };

        let left: Vec<RoomKey> = rooms
            .into_iter()
            .filter(|room| self.remove_member(room, &key, |_| true).is_some())
            .collect();

        debug!(member = ?key, rooms = left.len(), "Left all rooms");
        left
    }

    /// Get the current members of a room.
    ///
    /// Unknown rooms have no members.
    #[must_use]
    pub fn members_of(&self, room: &str) -> Vec<M> {
        self.rooms
            .get(room)
            .map(|members| members.values().map(|e| e.member.clone()).collect())
            .unwrap_or_default()
    }

    /// Check whether a member is in a room.
    #[must_use]
    pub fn contains(&self, room: &str, member: &M) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains_key(&E::key(member)))
    }

    /// Check if a room has any members.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Get the number of members in a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Get the keys of all non-empty rooms.
    #[must_use]
    pub fn rooms(&self) -> Vec<RoomKey> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Get the keys of the rooms a member has joined.
    #[must_use]
    pub fn rooms_of(&self, member: &M) -> Vec<RoomKey> {
        self.memberships
            .get(&E::key(member))
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the number of non-empty rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Record activity from a member in every room it joined.
    pub fn touch(&self, member: &M) {
        let key = E::key(member);
        let now = Instant::now();

        for room in self.rooms_of(member) {
            if let Some(mut members) = self.rooms.get_mut(&room) {
                if let Some(entry) = members.get_mut(&key) {
                    entry.last_seen = now;
                }
            }
        }
    }

    /// Remove members that have shown no activity for longer than `timeout`.
    ///
    /// Returns the evicted `(room, member)` pairs.
    pub fn evict_idle(&self, timeout: Duration) -> Vec<(RoomKey, M)> {
        let stale = self.idle_members(timeout);
        self.evict(stale, timeout)
    }

    /// Find members idle for longer than `timeout`.
    fn idle_members(&self, timeout: Duration) -> Vec<(RoomKey, E::Key)> {
        let now = Instant::now();

        self.rooms
            .iter()
            .flat_map(|room| {
                room.value()
                    .iter()
                    .filter(|(_, entry)| now.duration_since(entry.last_seen) > timeout)
                    .map(|(key, _)| (room.key().clone(), key.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Remove the given members unless they showed activity since they were
    /// found idle.
    fn evict(&self, stale: Vec<(RoomKey, E::Key)>, timeout: Duration) -> Vec<(RoomKey, M)> {
        let mut evicted = Vec::with_capacity(stale.len());
        for (room, key) in stale {
            let Some(member) = self.remove_member(&room, &key, |entry| {
                Instant::now().duration_since(entry.last_seen) > timeout
            }) else {
                continue;
            };

            debug!(room = %room, member = ?key, "Evicted idle member");
            evicted.push((room, member));
        }

        evicted
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            member_count: self.memberships.len(),
            total_memberships: self.rooms.iter().map(|r| r.len()).sum(),
        }
    }

    /// Remove one member key from a room if `should_remove` accepts its entry.
    ///
    /// Keeps the reverse index in step and deletes the room once it is empty.
    fn remove_member(
        &self,
        room: &str,
        key: &E::Key,
        should_remove: impl FnOnce(&MemberEntry<M>) -> bool,
    ) -> Option<M> {
        let removed = {
            let mut members = self.rooms.get_mut(room)?;
            if !members.get(key).is_some_and(should_remove) {
                return None;
            }
            let removed = members.remove(key);

            if let Some(mut rooms) = self.memberships.get_mut(key) {
                rooms.remove(room);
            }
            self.memberships.remove_if(key, |_, rooms| rooms.is_empty());
            removed
        };

        if removed.is_some() && self.rooms.remove_if(room, |_, m| m.is_empty()).is_some() {
            debug!(room = %room, "Deleted empty room");
        }

        removed.map(|entry| entry.member)
    }
}

impl<M, E> Default for Registry<M, E>
where
    M: Clone + Send + Sync + 'static,
    E: Equality<M>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of non-empty rooms.
    pub room_count: usize,
    /// Number of distinct members across all rooms.
    pub member_count: usize,
    /// Sum of room sizes.
    pub total_memberships: usize,
}
