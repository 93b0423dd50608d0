//! Core library for the consistent-hash load balancer.
//!
//! This crate provides the fundamental abstractions behind request routing:
//! - Token types and key partitioning
//! - Virtual node placement
//! - Replica identity, metadata, and state transitions
//! - The hash ring and the replica registry
//! - The synchronized topology view shared by routers and supervisors
//!
//! Everything here is synchronous and I/O-free; probing, provisioning, and
//! the HTTP surface live in the `balancer` crate.

pub mod error;
pub mod partitioner;
pub mod registry;
pub mod replica;
pub mod ring;
pub mod token;
pub mod topology;
pub mod vnode;

pub use error::{Error, Result};
pub use partitioner::Partitioner;
pub use registry::ReplicaRegistry;
pub use replica::{Replica, ReplicaId, ReplicaState};
pub use ring::HashRing;
pub use token::Token;
pub use topology::Topology;
pub use vnode::VirtualNode;
