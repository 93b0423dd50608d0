//! Consistent-hash load balancer service.
//!
//! Wires the `corelib` ring/topology to the operational pieces:
//! - `config`: command-line configuration
//! - `orchestrator`: the external capability that spawns/destroys replicas
//! - `supervisor`: scaling and self-healing
//! - `health`: periodic liveness probing with hysteresis
//! - `proxy`: key resolution and request forwarding
//! - `api`: the HTTP management and routing surface

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod proxy;
pub mod supervisor;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{BalancerError, Result};
pub use health::HealthMonitor;
pub use orchestrator::{DockerOrchestrator, Orchestrator};
pub use proxy::Router;
pub use supervisor::ReplicaSupervisor;
