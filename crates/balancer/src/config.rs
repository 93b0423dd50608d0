//! Service configuration.
//!
//! All knobs are exposed as command-line flags with defaults matching a
//! small local pool behind a Docker network.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "balancer", about = "Consistent-hash HTTP load balancer")]
pub struct Config {
    /// Address the management/routing HTTP surface listens on.
    #[arg(long, default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Target number of healthy replicas to maintain.
    #[arg(long, default_value_t = 3)]
    pub target_replicas: usize,

    /// Virtual nodes placed on the ring per replica.
    #[arg(long, default_value_t = 128)]
    pub vnodes_per_replica: usize,

    /// Seconds between health probe cycles.
    #[arg(long, default_value_t = 10)]
    pub probe_interval_secs: u64,

    /// Per-probe timeout in milliseconds. A probe is cancelled when it
    /// elapses.
    #[arg(long, default_value_t = 5_000)]
    pub probe_timeout_ms: u64,

    /// Consecutive probe failures before a suspect replica is declared dead.
    #[arg(long, default_value_t = 3)]
    pub failure_threshold: u32,

    /// Attempts per orchestrator call before the failure is surfaced.
    #[arg(long, default_value_t = 3)]
    pub provision_retries: u32,

    /// Base delay for exponential backoff between orchestrator retries.
    #[arg(long, default_value_t = 250)]
    pub retry_base_ms: u64,

    /// Timeout for forwarded client requests.
    #[arg(long, default_value_t = 10_000)]
    pub forward_timeout_ms: u64,

    /// Container image replicas are provisioned from.
    #[arg(long, default_value = "server:latest")]
    pub replica_image: String,

    /// Docker network replicas are attached to.
    #[arg(long, default_value = "net1")]
    pub docker_network: String,

    /// Port each replica serves on inside the network.
    #[arg(long, default_value_t = 5000)]
    pub replica_port: u16,
}

impl Config {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }
}
