//! Service-level error taxonomy.
//!
//! Only three failures ever reach a client: an empty ring, an infeasible
//! scale-down, and an orchestrator call that exhausted its retry budget.
//! Hash collisions and transient probe timeouts are absorbed internally.

use crate::orchestrator::OrchestratorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BalancerError>;

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("no healthy replicas available")]
    EmptyRing,

    #[error("cannot remove {requested} replicas, only {available} can be spared")]
    InsufficientReplicas { requested: usize, available: usize },

    #[error("orchestrator call failed after {attempts} attempts: {source}")]
    OrchestratorFailure {
        attempts: u32,
        #[source]
        source: OrchestratorError,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl From<corelib::Error> for BalancerError {
    fn from(err: corelib::Error) -> Self {
        match err {
            corelib::Error::EmptyRing => BalancerError::EmptyRing,
            other => BalancerError::InvalidRequest(other.to_string()),
        }
    }
}
