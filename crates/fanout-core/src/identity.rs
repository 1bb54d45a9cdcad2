//! Member identity and equality strategies.
//!
//! Whether two members are "the same" depends on the transport. A UDP
//! endpoint is a value: two joins from `10.0.0.1:4000` are one member. A live
//! connection is an identity: two connections behind the same NAT mapping are
//! still two members. The registry takes the rule as an explicit
//! [`Equality`] type parameter instead of relying on `PartialEq`.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Derives the key a registry uses to compare members.
pub trait Equality<M>: Send + Sync + 'static {
    /// Key under which a member is stored. Equal keys mean the same member.
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// Compute the key of a member.
    fn key(member: &M) -> Self::Key;

    /// Check whether two members are the same member.
    fn same(a: &M, b: &M) -> bool {
        Self::key(a) == Self::key(b)
    }
}

/// Members are equal when their values are equal (UDP endpoints).
#[derive(Debug, Clone, Copy, Default)]
pub struct ByValue;

impl<M> Equality<M> for ByValue
where
    M: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    type Key = M;

    fn key(member: &M) -> M {
        member.clone()
    }
}

/// Members are equal only when they are the same connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByIdentity;

/// A member with a process-unique connection identity.
pub trait Identified {
    fn connection_id(&self) -> ConnectionId;
}

impl<M: Identified> Equality<M> for ByIdentity {
    type Key = ConnectionId;

    fn key(member: &M) -> ConnectionId {
        member.connection_id()
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    struct Handle {
        id: ConnectionId,
        addr: SocketAddr,
    }

    impl Identified for Handle {
        fn connection_id(&self) -> ConnectionId {
            self.id
        }
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let id1 = ConnectionId::next();
        let id2 = ConnectionId::next();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn_"));
    }

    #[test]
    fn test_by_value_merges_equal_endpoints() {
        let a: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let c: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        assert!(<ByValue as Equality<SocketAddr>>::same(&a, &b));
        assert!(!<ByValue as Equality<SocketAddr>>::same(&a, &c));
    }

    #[test]
    fn test_by_identity_separates_shared_address() {
        let addr: SocketAddr = "203.0.113.7:5000".parse().unwrap();
        let a = Handle { id: ConnectionId::next(), addr };
        let b = Handle { id: ConnectionId::next(), addr };
        assert_eq!(a.addr, b.addr);
        assert!(!ByIdentity::same(&a, &b));
        assert!(ByIdentity::same(&a, &a));
    }
}
