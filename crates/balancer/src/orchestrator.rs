//! Orchestrator capability: the external runtime that creates and destroys
//! replica containers.
//!
//! The core never depends on a specific provisioning mechanism; everything
//! goes through the [`Orchestrator`] trait so the supervisor and health
//! monitor are unit-testable with a scripted fake. The production
//! implementation shells out to the Docker CLI and probes replicas over
//! HTTP.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to provision {name}: {reason}")]
    Provision { name: String, reason: String },

    #[error("failed to terminate {name}: {reason}")]
    Terminate { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What to provision.
#[derive(Debug, Clone)]
pub struct ReplicaSpec {
    /// Container name, also the network alias replicas are reached under.
    pub name: String,
    pub image: String,
    pub network: String,
    pub port: u16,
}

/// A provisioned replica as the orchestrator knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaHandle {
    pub name: String,
    /// host:port reachable from the balancer.
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive,
    Unreachable,
}

#[async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    /// Create a replica and wait until it is reachable. Returns its handle.
    async fn provision(&self, spec: &ReplicaSpec) -> Result<ReplicaHandle, OrchestratorError>;

    /// Tear a replica down.
    async fn terminate(&self, handle: &ReplicaHandle) -> Result<(), OrchestratorError>;

    /// Lightweight liveness check, bounded by `timeout`. The probe is
    /// cancelled (not left running) once the timeout elapses.
    async fn probe(&self, handle: &ReplicaHandle, timeout: Duration) -> ProbeOutcome;
}

/// How long a freshly provisioned replica gets to start answering
/// `/heartbeat`, and how often it is polled while starting.
const READY_TIMEOUT: Duration = Duration::from_secs(30);
const READY_POLL: Duration = Duration::from_millis(500);

/// Poll `handle` until it answers a probe or `deadline` elapses.
pub(crate) async fn await_ready(
    orchestrator: &dyn Orchestrator,
    handle: &ReplicaHandle,
    deadline: Duration,
    poll: Duration,
) -> bool {
    let give_up = tokio::time::Instant::now() + deadline;
    loop {
        if orchestrator.probe(handle, poll).await == ProbeOutcome::Alive {
            return true;
        }
        if tokio::time::Instant::now() >= give_up {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Docker-backed orchestrator.
///
/// Replicas are containers on a shared bridge network, addressed by their
/// network alias. Liveness is a GET against the replica's `/heartbeat`
/// endpoint.
pub struct DockerOrchestrator {
    http: reqwest::Client,
}

impl DockerOrchestrator {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn docker(args: &[&str]) -> Result<std::process::Output, OrchestratorError> {
        debug!(?args, "running docker");
        Ok(Command::new("docker").args(args).output().await?)
    }
}

impl Default for DockerOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for DockerOrchestrator {
    async fn provision(&self, spec: &ReplicaSpec) -> Result<ReplicaHandle, OrchestratorError> {
        let env = format!("SERVER_ID={}", spec.name);
        let output = Self::docker(&[
            "run",
            "--name",
            &spec.name,
            "--network",
            &spec.network,
            "--network-alias",
            &spec.name,
            "-e",
            &env,
            "-d",
            &spec.image,
        ])
        .await?;

        if !output.status.success() {
            return Err(OrchestratorError::Provision {
                name: spec.name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let handle = ReplicaHandle {
            name: spec.name.clone(),
            address: format!("{}:{}", spec.name, spec.port),
        };

        // `docker run -d` returns before the server inside is listening;
        // provisioning only counts once the replica answers a probe.
        if !await_ready(self, &handle, READY_TIMEOUT, READY_POLL).await {
            warn!(replica = %handle.name, "replica never became reachable, tearing it down");
            if let Err(err) = self.terminate(&handle).await {
                warn!(replica = %handle.name, error = %err, "teardown of unready replica failed");
            }
            return Err(OrchestratorError::Provision {
                name: spec.name.clone(),
                reason: format!("not reachable within {:?} of container start", READY_TIMEOUT),
            });
        }

        Ok(handle)
    }

    async fn terminate(&self, handle: &ReplicaHandle) -> Result<(), OrchestratorError> {
        let stop = Self::docker(&["stop", &handle.name]).await?;
        if !stop.status.success() {
            warn!(replica = %handle.name, "docker stop failed, attempting rm anyway");
        }
        let rm = Self::docker(&["rm", &handle.name]).await?;
        if !rm.status.success() {
            return Err(OrchestratorError::Terminate {
                name: handle.name.clone(),
                reason: String::from_utf8_lossy(&rm.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn probe(&self, handle: &ReplicaHandle, timeout: Duration) -> ProbeOutcome {
        let url = format!("http://{}/heartbeat", handle.address);
        let request = self.http.get(&url).timeout(timeout).send();
        match request.await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Alive,
            Ok(response) => {
                debug!(replica = %handle.name, status = %response.status(), "probe rejected");
                ProbeOutcome::Unreachable
            }
            Err(err) => {
                debug!(replica = %handle.name, error = %err, "probe failed");
                ProbeOutcome::Unreachable
            }
        }
    }
}
