//! Synchronized topology view over the ring and the registry.
//!
//! The ring and the registry together are the single shared mutable resource
//! in the system. `Topology` owns both behind one `RwLock` so that compound
//! operations (mark dead + evict virtual nodes, mark healthy + insert virtual
//! nodes) are atomic with respect to concurrent lookups: a reader never
//! observes a dead replica that is still routable, or a half-inserted ring.
//!
//! Lookups take the read lock and proceed concurrently; all mutation goes
//! through the narrow interface below.

use crate::error::{Error, Result};
use crate::registry::ReplicaRegistry;
use crate::replica::{Replica, ReplicaId};
use crate::ring::HashRing;
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Inner {
    ring: HashRing,
    registry: ReplicaRegistry,
}

/// Shared, synchronized ring + registry.
#[derive(Debug, Default)]
pub struct Topology {
    inner: RwLock<Inner>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly provisioned replica. It is not routable yet.
    pub fn register(&self, replica: Replica) -> Result<()> {
        self.inner.write().registry.register(replica)
    }

    /// Promote a provisioning replica to `Healthy` and place its virtual
    /// nodes on the ring, as one atomic step.
    pub fn promote(&self, id: ReplicaId) -> Result<()> {
        let mut inner = self.inner.write();
        let (name, vnode_count) = {
            let replica = inner.registry.get(id).ok_or(Error::UnknownReplica(id))?;
            (replica.name.clone(), replica.vnode_count)
        };
        inner.registry.mark_healthy(id)?;
        inner.ring.add_replica(id, &name, vnode_count)?;
        Ok(())
    }

    /// Probe hysteresis: flag a routable replica as suspect.
    ///
    /// Suspect replicas keep their virtual nodes; only a `Dead` transition
    /// evicts them. This keeps transient probe failures from churning the
    /// keyspace.
    pub fn mark_suspect(&self, id: ReplicaId) -> Result<()> {
        self.inner.write().registry.mark_suspect(id)
    }

    /// Probe hysteresis: a suspect replica answered again.
    pub fn mark_healthy(&self, id: ReplicaId) -> Result<()> {
        self.inner.write().registry.mark_healthy(id)
    }

    /// Transition a replica to `Dead`, remove all its virtual nodes, and drop
    /// its record — one atomic step. Returns the removed replica so the
    /// caller can tear down its backing container.
    ///
    /// Idempotent: evicting an unknown id returns `Ok(None)`.
    pub fn evict(&self, id: ReplicaId) -> Result<Option<Replica>> {
        let mut inner = self.inner.write();
        if inner.registry.get(id).is_none() {
            return Ok(None);
        }
        inner.ring.remove_replica(id);
        inner.registry.mark_dead(id)?;
        Ok(inner.registry.remove(id))
    }

    /// Resolve a routing key to the owning replica.
    pub fn lookup(&self, key: &[u8]) -> Result<Replica> {
        let inner = self.inner.read();
        let id = inner.ring.lookup(key)?;
        inner
            .registry
            .get(id)
            .cloned()
            .ok_or(Error::UnknownReplica(id))
    }

    /// Next distinct replica clockwise of `key`, for the router's single
    /// retry after a forwarding failure.
    pub fn lookup_successor(&self, key: &[u8], skip: ReplicaId) -> Option<Replica> {
        let inner = self.inner.read();
        let id = inner.ring.successor(key, skip)?;
        inner.registry.get(id).cloned()
    }

    /// Snapshot of all live replicas, ordered by join sequence.
    pub fn replicas(&self) -> Vec<Replica> {
        self.inner.read().registry.list()
    }

    /// Replicas the health monitor should probe (routable states).
    pub fn probe_targets(&self) -> Vec<Replica> {
        self.inner
            .read()
            .registry
            .list()
            .into_iter()
            .filter(|r| r.state.is_routable())
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.inner.read().registry.healthy_count()
    }

    pub fn ring_size(&self) -> usize {
        self.inner.read().ring.token_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().ring.is_empty()
    }
}
