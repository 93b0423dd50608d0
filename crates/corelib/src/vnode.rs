//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! Instead of each replica having a single position on the ring, each replica
//! has multiple positions (virtual nodes). This provides:
//!
//! 1. **Better Load Distribution**: More tokens = smoother distribution of keys
//! 2. **Gradual Rebalancing**: When replicas join/leave, only ~1/N of keys move
//! 3. **Fault Tolerance**: Failure of one replica spreads its keyspace across
//!    all survivors instead of dumping it on a single neighbor
//!
//! # Performance Characteristics
//!
//! - **Memory**: O(v) where v = virtual nodes per replica
//! - **Lookup**: O(log n) where n = total virtual nodes
//! - **Rebalancing**: O(k/N) keys move when a replica joins/leaves
//!   (k = total keys, N = replica count)

use crate::replica::ReplicaId;
use crate::token::xxh3::Xxh3Token;

/// A virtual node on the hash ring.
///
/// Represents a single token position owned by a replica. Each replica places
/// many virtual nodes (typically 128) around the ring.
///
/// # Invariants
///
/// - Every `VirtualNode` has a unique token (collisions are resolved at
///   insertion time by salting the placement hash)
/// - Every `VirtualNode` belongs to exactly one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    /// Token position on the ring, the hash of `"replica_name:index"`.
    pub token: Xxh3Token,
    /// The replica that owns this virtual node.
    pub replica_id: ReplicaId,
}

impl VirtualNode {
    #[inline]
    pub fn new(token: Xxh3Token, replica_id: ReplicaId) -> Self {
        Self { token, replica_id }
    }

    /// Deterministic placement token for `(replica_name, vnode_index)`.
    ///
    /// `salt` is 0 for the first attempt; the ring increments it until the
    /// token is unique. The placement identity string keeps derivation stable
    /// across restarts of the same named replica.
    pub fn placement_token(replica_name: &str, vnode_index: usize, salt: u64) -> Xxh3Token {
        let vnode_key = format!("{}:{}", replica_name, vnode_index);
        Xxh3Token::from_seeded(vnode_key.as_bytes(), salt)
    }

    #[inline]
    pub fn token(&self) -> Xxh3Token {
        self.token
    }

    #[inline]
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }
}

impl std::fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VNode(token={:016x}, replica={})", self.token.0, self.replica_id)
    }
}
