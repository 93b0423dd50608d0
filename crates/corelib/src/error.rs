//! Error types for the core library.

use crate::replica::{ReplicaId, ReplicaState};
use std::fmt;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No virtual node exists; nothing can be routed.
    EmptyRing,
    /// Invalid replica configuration (e.g. zero virtual nodes).
    InvalidReplica(String),
    /// Operation referenced a replica the registry does not know.
    UnknownReplica(ReplicaId),
    /// A replica is already registered under this id.
    DuplicateReplica(ReplicaId),
    /// Disallowed state transition (e.g. leaving `Dead`).
    InvalidTransition {
        id: ReplicaId,
        from: ReplicaState,
        to: ReplicaState,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyRing => write!(f, "hash ring is empty"),
            Error::InvalidReplica(msg) => write!(f, "invalid replica: {}", msg),
            Error::UnknownReplica(id) => write!(f, "unknown replica: {}", id),
            Error::DuplicateReplica(id) => write!(f, "replica already registered: {}", id),
            Error::InvalidTransition { id, from, to } => {
                write!(f, "replica {}: invalid transition {:?} -> {:?}", id, from, to)
            }
        }
    }
}

impl std::error::Error for Error {}
