//! Replica abstractions for the consistent hash ring.
//!
//! Replicas represent backend server instances participating in the pool.
//! They are identified by a compact `ReplicaId` that is cheap to compare and
//! hash; the id is allocated monotonically, so it doubles as the join order.

use serde::Serialize;
use std::fmt;

/// Compact identifier for a replica in the pool.
///
/// Newtype over `u64`, allocated from a monotonic counter. Higher ids were
/// added later, which the supervisor relies on when picking scale-down
/// victims.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct ReplicaId(pub u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a replica.
///
/// Transitions:
/// `Provisioning -> Healthy` (orchestrator confirmed readiness),
/// `Healthy <-> Suspect` (probe hysteresis), and any state `-> Dead`.
/// `Dead` is terminal.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaState {
    Provisioning,
    Healthy,
    Suspect,
    Dead,
}

impl ReplicaState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ReplicaState) -> bool {
        use ReplicaState::*;
        match (self, next) {
            (Dead, _) => false,
            (_, Dead) => true,
            (Provisioning, Healthy) => true,
            (Healthy, Suspect) | (Suspect, Healthy) => true,
            (s, n) => s == n,
        }
    }

    /// Replicas in this state count towards the routable pool.
    pub fn is_routable(self) -> bool {
        matches!(self, ReplicaState::Healthy | ReplicaState::Suspect)
    }
}

/// A backend replica participating in the pool.
///
/// Keep this struct small and cheap to clone; connections and probe counters
/// live elsewhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replica {
    pub id: ReplicaId,
    /// Human-readable name, also the orchestrator handle (container name).
    pub name: String,
    /// host:port reachable by the router and the health monitor.
    pub address: String,
    /// Number of virtual nodes this replica places on the ring.
    pub vnode_count: usize,
    pub state: ReplicaState,
}

impl Replica {
    /// Construct a new replica in the `Provisioning` state.
    pub fn new(
        id: ReplicaId,
        name: impl Into<String>,
        address: impl Into<String>,
        vnode_count: usize,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            vnode_count,
            state: ReplicaState::Provisioning,
        }
    }
}
