//! Replica registry: the source of truth for replica metadata and state.
//!
//! The registry records every replica the supervisor has provisioned and
//! enforces the lifecycle state machine. It is a plain data structure;
//! [`Topology`](crate::topology::Topology) guards the shared instance and
//! keeps registry transitions atomic with ring mutations.

use crate::error::{Error, Result};
use crate::replica::{Replica, ReplicaId, ReplicaState};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    replicas: HashMap<ReplicaId, Replica>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replica, which must be in the `Provisioning` state.
    pub fn register(&mut self, replica: Replica) -> Result<()> {
        if self.replicas.contains_key(&replica.id) {
            return Err(Error::DuplicateReplica(replica.id));
        }
        if replica.state != ReplicaState::Provisioning {
            return Err(Error::InvalidReplica(format!(
                "replica {} must be registered as provisioning, got {:?}",
                replica.name, replica.state
            )));
        }
        if replica.vnode_count == 0 {
            return Err(Error::InvalidReplica(format!(
                "replica {} requested zero virtual nodes",
                replica.name
            )));
        }
        self.replicas.insert(replica.id, replica);
        Ok(())
    }

    pub fn get(&self, id: ReplicaId) -> Option<&Replica> {
        self.replicas.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Replica> {
        self.replicas.values().find(|r| r.name == name)
    }

    pub fn mark_healthy(&mut self, id: ReplicaId) -> Result<()> {
        self.transition(id, ReplicaState::Healthy)
    }

    pub fn mark_suspect(&mut self, id: ReplicaId) -> Result<()> {
        self.transition(id, ReplicaState::Suspect)
    }

    /// Terminal transition. The caller (the topology) is responsible for
    /// evicting the replica's virtual nodes in the same critical section.
    pub fn mark_dead(&mut self, id: ReplicaId) -> Result<()> {
        self.transition(id, ReplicaState::Dead)
    }

    /// Drop a replica's record entirely, returning it for teardown.
    pub fn remove(&mut self, id: ReplicaId) -> Option<Replica> {
        self.replicas.remove(&id)
    }

    /// Snapshot of all live replicas, ordered by join sequence (id).
    pub fn list(&self) -> Vec<Replica> {
        let mut all: Vec<Replica> = self.replicas.values().cloned().collect();
        all.sort_by_key(|r| r.id);
        all
    }

    pub fn healthy_count(&self) -> usize {
        self.replicas
            .values()
            .filter(|r| r.state == ReplicaState::Healthy)
            .count()
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    fn transition(&mut self, id: ReplicaId, to: ReplicaState) -> Result<()> {
        let replica = self
            .replicas
            .get_mut(&id)
            .ok_or(Error::UnknownReplica(id))?;
        if !replica.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                id,
                from: replica.state,
                to,
            });
        }
        replica.state = to;
        Ok(())
    }
}
