//! Replica supervisor: scaling and self-healing.
//!
//! The supervisor owns the pool's target size. It reacts to explicit scale
//! requests from the management API and to death reports from the health
//! monitor, in both cases driving the external orchestrator and then
//! updating the shared topology. Resizes are serialized through one async
//! mutex so two concurrent requests can never race over the same replica.
//!
//! Scale-down victim policy: explicitly hinted names first, then
//! most-recently-added (highest id). Validation is all-or-nothing — a
//! request that names an unknown replica mutates nothing.

use crate::config::Config;
use crate::error::{BalancerError, Result};
use crate::orchestrator::{Orchestrator, ReplicaHandle, ReplicaSpec};
use corelib::{Replica, ReplicaId, ReplicaState, Topology};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

pub struct ReplicaSupervisor {
    topology: Arc<Topology>,
    orchestrator: Arc<dyn Orchestrator>,
    /// Serializes resizes and failure recovery.
    resize_lock: Mutex<()>,
    next_id: AtomicU64,
    target: AtomicUsize,
    vnodes_per_replica: usize,
    replica_image: String,
    docker_network: String,
    replica_port: u16,
    provision_retries: u32,
    retry_base: Duration,
}

impl ReplicaSupervisor {
    pub fn new(
        topology: Arc<Topology>,
        orchestrator: Arc<dyn Orchestrator>,
        config: &Config,
    ) -> Self {
        Self {
            topology,
            orchestrator,
            resize_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            target: AtomicUsize::new(config.target_replicas),
            vnodes_per_replica: config.vnodes_per_replica,
            replica_image: config.replica_image.clone(),
            docker_network: config.docker_network.clone(),
            replica_port: config.replica_port,
            provision_retries: config.provision_retries,
            retry_base: config.retry_base(),
        }
    }

    /// The replica count the pool converges to.
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Relaxed)
    }

    /// Scale the pool to exactly `target` healthy replicas.
    pub async fn scale_to(&self, target: usize, hints: Vec<String>) -> Result<Vec<Replica>> {
        let _guard = self.resize_lock.lock().await;
        self.resize(target, hints).await
    }

    /// Add `count` replicas. Hints name the new replicas; generated names
    /// fill the rest.
    pub async fn scale_up(&self, count: usize, hints: Vec<String>) -> Result<Vec<Replica>> {
        let _guard = self.resize_lock.lock().await;
        let target = self.healthy().len() + count;
        self.resize(target, hints).await
    }

    /// Remove `count` replicas. Hints name the victims; the newest replicas
    /// fill the rest. The pool never shrinks below one replica.
    pub async fn scale_down(&self, count: usize, hints: Vec<String>) -> Result<Vec<Replica>> {
        let _guard = self.resize_lock.lock().await;
        let current = self.healthy().len();
        if count >= current {
            return Err(BalancerError::InsufficientReplicas {
                requested: count,
                available: current.saturating_sub(1),
            });
        }
        self.resize(current - count, hints).await
    }

    /// Death report from the health monitor: evict the replica and provision
    /// exactly one replacement, restoring the target count.
    pub async fn on_replica_dead(&self, id: ReplicaId) -> Result<()> {
        let _guard = self.resize_lock.lock().await;

        let Some(dead) = self.topology.evict(id)? else {
            // Already evicted, e.g. by a concurrent scale-down.
            return Ok(());
        };
        warn!(replica = %dead.name, id = %id, "replica dead, evicted from ring");

        if let Err(err) = self.terminate_with_retry(&handle_of(&dead)).await {
            // The replica is unroutable either way; a leaked container is
            // logged, not fatal.
            warn!(replica = %dead.name, error = %err, "teardown of dead replica failed");
        }

        if self.healthy().len() < self.target() {
            let replacement = self.provision_one(None).await?;
            info!(replica = %replacement.name, "replacement provisioned");
        }
        Ok(())
    }

    /// Consume death reports until the channel closes.
    pub fn run(self: Arc<Self>, mut dead_rx: mpsc::Receiver<ReplicaId>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(id) = dead_rx.recv().await {
                if let Err(err) = self.on_replica_dead(id).await {
                    error!(id = %id, error = %err, "failure recovery did not complete");
                }
            }
        })
    }

    // Caller holds `resize_lock`.
    async fn resize(&self, target: usize, hints: Vec<String>) -> Result<Vec<Replica>> {
        let healthy = self.healthy();
        let current = healthy.len();

        if target < 1 {
            return Err(BalancerError::InsufficientReplicas {
                requested: current,
                available: current.saturating_sub(1),
            });
        }

        if target > current {
            self.grow(target - current, hints).await?;
        } else if target < current {
            self.shrink(&healthy, current - target, hints).await?;
        } else if !hints.is_empty() {
            return Err(BalancerError::InvalidRequest(
                "hints given but no change in replica count requested".to_string(),
            ));
        }

        self.target.store(target, Ordering::Relaxed);
        Ok(self.topology.replicas())
    }

    async fn grow(&self, deficit: usize, hints: Vec<String>) -> Result<()> {
        if hints.len() > deficit {
            return Err(BalancerError::InvalidRequest(format!(
                "{} names hinted but only {} replicas requested",
                hints.len(),
                deficit
            )));
        }
        let taken: Vec<String> = self.topology.replicas().into_iter().map(|r| r.name).collect();
        for hint in &hints {
            if taken.contains(hint) {
                return Err(BalancerError::InvalidRequest(format!(
                    "replica name already in use: {}",
                    hint
                )));
            }
        }

        // A permanent failure on one replica does not abort the rest; the
        // pool grows as far as it can and the first failure is surfaced.
        let mut names = hints.into_iter();
        let mut failure = None;
        for _ in 0..deficit {
            if let Err(err) = self.provision_one(names.next()).await {
                failure.get_or_insert(err);
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn shrink(&self, healthy: &[Replica], surplus: usize, hints: Vec<String>) -> Result<()> {
        if hints.len() > surplus {
            return Err(BalancerError::InvalidRequest(format!(
                "{} names hinted but only {} removals requested",
                hints.len(),
                surplus
            )));
        }

        // All-or-nothing: resolve every victim before evicting any.
        let mut victims: Vec<Replica> = Vec::with_capacity(surplus);
        for hint in &hints {
            let replica = healthy
                .iter()
                .find(|r| &r.name == hint)
                .cloned()
                .ok_or_else(|| {
                    BalancerError::InvalidRequest(format!("no healthy replica named {}", hint))
                })?;
            victims.push(replica);
        }

        // Newest first (highest id) for the remainder.
        let mut remaining: Vec<Replica> = healthy
            .iter()
            .filter(|r| !victims.iter().any(|v| v.id == r.id))
            .cloned()
            .collect();
        remaining.sort_by(|a, b| b.id.cmp(&a.id));
        victims.extend(remaining.into_iter().take(surplus - victims.len()));

        let mut teardown_failure = None;
        for victim in victims {
            self.topology.evict(victim.id)?;
            info!(replica = %victim.name, id = %victim.id, "replica removed from ring");
            if let Err(err) = self.terminate_with_retry(&handle_of(&victim)).await {
                warn!(replica = %victim.name, error = %err, "teardown failed");
                teardown_failure.get_or_insert(err);
            }
        }
        match teardown_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn provision_one(&self, name: Option<String>) -> Result<Replica> {
        let name = name.unwrap_or_else(generate_name);
        let spec = ReplicaSpec {
            name: name.clone(),
            image: self.replica_image.clone(),
            network: self.docker_network.clone(),
            port: self.replica_port,
        };

        let handle = self.provision_with_retry(&spec).await?;

        let id = ReplicaId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let replica = Replica::new(id, name.clone(), handle.address, self.vnodes_per_replica);
        self.topology.register(replica.clone())?;
        self.topology.promote(id)?;
        info!(replica = %name, id = %id, "replica healthy and routable");
        Ok(replica)
    }

    async fn provision_with_retry(&self, spec: &ReplicaSpec) -> Result<ReplicaHandle> {
        let mut last_err = None;
        for attempt in 1..=self.provision_retries {
            match self.orchestrator.provision(spec).await {
                Ok(handle) => return Ok(handle),
                Err(err) => {
                    warn!(replica = %spec.name, attempt, error = %err, "provision attempt failed");
                    last_err = Some(err);
                }
            }
            if attempt < self.provision_retries {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }
        Err(BalancerError::OrchestratorFailure {
            attempts: self.provision_retries,
            // provision_retries >= 1, so at least one error was recorded
            source: last_err.expect("at least one provision attempt"),
        })
    }

    async fn terminate_with_retry(&self, handle: &ReplicaHandle) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=self.provision_retries {
            match self.orchestrator.terminate(handle).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(replica = %handle.name, attempt, error = %err, "terminate attempt failed");
                    last_err = Some(err);
                }
            }
            if attempt < self.provision_retries {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }
        Err(BalancerError::OrchestratorFailure {
            attempts: self.provision_retries,
            source: last_err.expect("at least one terminate attempt"),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base * 2u32.saturating_pow(attempt - 1)
    }

    fn healthy(&self) -> Vec<Replica> {
        self.topology
            .replicas()
            .into_iter()
            .filter(|r| r.state == ReplicaState::Healthy)
            .collect()
    }
}

fn handle_of(replica: &Replica) -> ReplicaHandle {
    ReplicaHandle {
        name: replica.name.clone(),
        address: replica.address.clone(),
    }
}

fn generate_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("Server-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::fake::FakeOrchestrator;

    fn test_config() -> Config {
        Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            target_replicas: 3,
            vnodes_per_replica: 8,
            probe_interval_secs: 10,
            probe_timeout_ms: 100,
            failure_threshold: 3,
            provision_retries: 3,
            retry_base_ms: 1,
            forward_timeout_ms: 1_000,
            replica_image: "server:latest".to_string(),
            docker_network: "net1".to_string(),
            replica_port: 5000,
        }
    }

    fn setup() -> (Arc<Topology>, Arc<FakeOrchestrator>, ReplicaSupervisor) {
        let topology = Arc::new(Topology::new());
        let orchestrator = Arc::new(FakeOrchestrator::new());
        let supervisor =
            ReplicaSupervisor::new(topology.clone(), orchestrator.clone(), &test_config());
        (topology, orchestrator, supervisor)
    }

    #[tokio::test]
    async fn test_scale_up_provisions_exact_deficit() {
        let (topology, orchestrator, supervisor) = setup();
        supervisor.scale_to(3, vec![]).await.unwrap();
        assert_eq!(orchestrator.provision_count(), 3);

        let replicas = supervisor.scale_to(5, vec![]).await.unwrap();
        assert_eq!(orchestrator.provision_count(), 5, "exactly 2 more provision calls");
        assert_eq!(replicas.len(), 5);
        assert_eq!(topology.healthy_count(), 5);
    }

    #[tokio::test]
    async fn test_permanent_provision_failure_is_surfaced() {
        let (topology, orchestrator, supervisor) = setup();
        supervisor.scale_to(3, vec![]).await.unwrap();

        // One logical provision fails through its whole retry budget.
        orchestrator.fail_next_provisions(3);
        let err = supervisor.scale_to(5, vec![]).await.unwrap_err();
        assert!(matches!(err, BalancerError::OrchestratorFailure { attempts: 3, .. }));

        // The pool degraded gracefully to 4, not 5 and not 3.
        assert_eq!(topology.healthy_count(), 4);
    }

    #[tokio::test]
    async fn test_scale_up_with_hinted_names() {
        let (topology, orchestrator, supervisor) = setup();
        supervisor
            .scale_up(2, vec!["alpha".to_string()])
            .await
            .unwrap();

        let names: Vec<String> = topology.replicas().into_iter().map(|r| r.name).collect();
        assert!(names.contains(&"alpha".to_string()));
        assert_eq!(names.len(), 2);
        assert_eq!(orchestrator.provisioned()[0], "alpha", "hinted name used first");
    }

    #[tokio::test]
    async fn test_too_many_hints_rejected_without_mutation() {
        let (topology, orchestrator, supervisor) = setup();
        let err = supervisor
            .scale_up(1, vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BalancerError::InvalidRequest(_)));
        assert_eq!(orchestrator.provision_count(), 0);
        assert!(topology.replicas().is_empty());
    }

    #[tokio::test]
    async fn test_scale_down_removes_newest_first() {
        let (topology, orchestrator, supervisor) = setup();
        supervisor.scale_to(3, vec![]).await.unwrap();
        let oldest = topology.replicas()[0].clone();
        let newest = topology.replicas()[2].clone();

        supervisor.scale_down(1, vec![]).await.unwrap();

        let remaining: Vec<ReplicaId> =
            topology.replicas().into_iter().map(|r| r.id).collect();
        assert!(remaining.contains(&oldest.id));
        assert!(!remaining.contains(&newest.id));
        assert_eq!(orchestrator.terminated(), vec![newest.name]);
    }

    #[tokio::test]
    async fn test_scale_down_honors_hints() {
        let (topology, orchestrator, supervisor) = setup();
        supervisor
            .scale_to(3, vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();

        supervisor.scale_down(1, vec!["a".to_string()]).await.unwrap();

        let names: Vec<String> = topology.replicas().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(orchestrator.terminated(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_scale_down_unknown_hint_mutates_nothing() {
        let (topology, orchestrator, supervisor) = setup();
        supervisor.scale_to(3, vec![]).await.unwrap();

        let err = supervisor
            .scale_down(2, vec!["no-such-replica".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BalancerError::InvalidRequest(_)));
        assert_eq!(topology.healthy_count(), 3, "no partial eviction");
        assert!(orchestrator.terminated().is_empty());
    }

    #[tokio::test]
    async fn test_scale_below_floor_rejected() {
        let (_topology, _orchestrator, supervisor) = setup();
        supervisor.scale_to(2, vec![]).await.unwrap();

        let err = supervisor.scale_down(2, vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            BalancerError::InsufficientReplicas { requested: 2, available: 1 }
        ));
    }

    #[tokio::test]
    async fn test_dead_replica_is_replaced() {
        let (topology, orchestrator, supervisor) = setup();
        supervisor.scale_to(3, vec![]).await.unwrap();
        let victim = topology.replicas()[1].clone();

        supervisor.on_replica_dead(victim.id).await.unwrap();

        assert_eq!(topology.healthy_count(), 3, "pool converged back to target");
        let names: Vec<String> = topology.replicas().into_iter().map(|r| r.name).collect();
        assert!(!names.contains(&victim.name));
        assert!(orchestrator.terminated().contains(&victim.name));
    }

    #[tokio::test]
    async fn test_dead_report_for_evicted_replica_is_noop() {
        let (topology, orchestrator, supervisor) = setup();
        supervisor.scale_to(2, vec![]).await.unwrap();
        let victim = topology.replicas()[1].clone();
        topology.evict(victim.id).unwrap();
        let provisions_before = orchestrator.provision_count();

        supervisor.on_replica_dead(victim.id).await.unwrap();
        assert_eq!(orchestrator.provision_count(), provisions_before);
    }
}
