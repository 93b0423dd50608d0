//! Consistent hash ring implementation.
//!
//! The ring is a sorted, logically circular map from tokens to replica ids.
//! Lookups hash the routing key and walk clockwise to the first virtual node
//! at or after that position, wrapping to the smallest token when the key
//! hashes past the end.
//!
//! The ring itself is a plain data structure with no interior locking;
//! [`Topology`](crate::topology::Topology) owns the single synchronized
//! instance shared between the router and the supervisor.

use crate::error::{Error, Result};
use crate::partitioner::{Partitioner, Xxh3Partitioner};
use crate::replica::ReplicaId;
use crate::token::xxh3::Xxh3Token;
use crate::vnode::VirtualNode;
use std::collections::BTreeMap;

/// The consistent hash ring.
#[derive(Debug, Default)]
pub struct HashRing {
    tokens: BTreeMap<Xxh3Token, ReplicaId>,
    partitioner: Xxh3Partitioner,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `vnode_count` virtual nodes for a replica.
    ///
    /// Placement tokens are derived from `(replica_name, index)`; a collision
    /// with an existing token is resolved by re-deriving with an incremented
    /// salt until the token is unique. Collisions never surface to callers.
    ///
    /// Returns the number of virtual nodes inserted.
    pub fn add_replica(
        &mut self,
        id: ReplicaId,
        replica_name: &str,
        vnode_count: usize,
    ) -> Result<usize> {
        if vnode_count == 0 {
            return Err(Error::InvalidReplica(format!(
                "replica {} requested zero virtual nodes",
                replica_name
            )));
        }

        for index in 0..vnode_count {
            let mut salt = 0u64;
            loop {
                let token = VirtualNode::placement_token(replica_name, index, salt);
                if !self.tokens.contains_key(&token) {
                    self.tokens.insert(token, id);
                    break;
                }
                salt += 1;
            }
        }
        Ok(vnode_count)
    }

    /// Remove every virtual node owned by `id`.
    ///
    /// Idempotent: removing an absent replica is a no-op. Returns the number
    /// of virtual nodes removed (0 when the replica was not present).
    pub fn remove_replica(&mut self, id: ReplicaId) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, owner| *owner != id);
        before - self.tokens.len()
    }

    /// Map a routing key to the replica owning it.
    ///
    /// Binary search for the first token >= hash(key), wrapping to the
    /// smallest token (circular property). O(log V) in the number of
    /// virtual nodes.
    pub fn lookup(&self, key: &[u8]) -> Result<ReplicaId> {
        let position = self.partitioner.partition(key);
        self.owner_at(position)
    }

    /// Owner of an explicit ring position.
    pub fn owner_at(&self, position: Xxh3Token) -> Result<ReplicaId> {
        if self.tokens.is_empty() {
            return Err(Error::EmptyRing);
        }
        let owner = self
            .tokens
            .range(position..)
            .next()
            .or_else(|| self.tokens.iter().next())
            .map(|(_, id)| *id);
        // Non-empty map always yields an entry after wrapping.
        owner.ok_or(Error::EmptyRing)
    }

    /// First replica clockwise of `key` that is not `skip`.
    ///
    /// Used by the router's single-retry policy after a forwarding failure.
    /// Returns `None` when no other replica exists on the ring.
    pub fn successor(&self, key: &[u8], skip: ReplicaId) -> Option<ReplicaId> {
        let position = self.partitioner.partition(key);
        self.tokens
            .range(position..)
            .chain(self.tokens.range(..position))
            .map(|(_, id)| *id)
            .find(|id| *id != skip)
    }

    /// Number of virtual nodes on the ring.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Snapshot of all virtual nodes, sorted by token.
    pub fn virtual_nodes(&self) -> Vec<VirtualNode> {
        self.tokens
            .iter()
            .map(|(token, id)| VirtualNode::new(*token, *id))
            .collect()
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }
}
