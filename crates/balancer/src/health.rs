//! Health monitor: periodic liveness probing with failure hysteresis.
//!
//! A single background task runs a probe cycle at a fixed interval. Within a
//! cycle, every routable replica is probed concurrently, each probe bounded
//! by its own timeout, so one unreachable replica never delays the others.
//!
//! Per-replica state machine: `Healthy --failure--> Suspect --k consecutive
//! failures--> Dead`, and `Suspect --success--> Healthy`. Suspect is internal
//! hysteresis; only `Dead` is reported to the supervisor (over an mpsc
//! channel), which evicts and replaces the replica.

use crate::config::Config;
use crate::orchestrator::{Orchestrator, ProbeOutcome, ReplicaHandle};
use corelib::{Replica, ReplicaId, ReplicaState, Topology};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct HealthMonitor {
    topology: Arc<Topology>,
    orchestrator: Arc<dyn Orchestrator>,
    probe_interval: Duration,
    probe_timeout: Duration,
    failure_threshold: u32,
    /// Consecutive probe failures per replica; absent means zero.
    failures: DashMap<ReplicaId, u32>,
    dead_tx: mpsc::Sender<ReplicaId>,
}

impl HealthMonitor {
    pub fn new(
        topology: Arc<Topology>,
        orchestrator: Arc<dyn Orchestrator>,
        config: &Config,
        dead_tx: mpsc::Sender<ReplicaId>,
    ) -> Self {
        Self {
            topology,
            orchestrator,
            probe_interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
            failure_threshold: config.failure_threshold,
            failures: DashMap::new(),
            dead_tx,
        }
    }

    /// Spawn the recurring probe task. It stops when `shutdown` flips.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.probe_interval);
            // The immediate first tick would probe replicas that are still
            // settling; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => self.run_probe_cycle().await,
                    _ = shutdown.changed() => {
                        info!("health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Probe every routable replica once, concurrently.
    pub async fn run_probe_cycle(&self) {
        let targets = self.topology.probe_targets();
        // Evicted replicas leave no counter behind.
        self.failures
            .retain(|id, _| targets.iter().any(|r| r.id == *id));
        if targets.is_empty() {
            return;
        }

        let probes = targets.into_iter().map(|replica| {
            let handle = ReplicaHandle {
                name: replica.name.clone(),
                address: replica.address.clone(),
            };
            async move {
                let outcome = self.orchestrator.probe(&handle, self.probe_timeout).await;
                (replica, outcome)
            }
        });

        for (replica, outcome) in futures::future::join_all(probes).await {
            match outcome {
                ProbeOutcome::Alive => self.record_success(&replica),
                ProbeOutcome::Unreachable => self.record_failure(replica.id),
            }
        }
    }

    fn record_success(&self, replica: &Replica) {
        if self.failures.remove(&replica.id).is_some() {
            debug!(replica = %replica.name, "probe recovered, failure count reset");
        }
        // A Suspect replica can have no counter left, e.g. when a death
        // report could not be delivered at the threshold; a successful probe
        // still recovers it.
        if replica.state == ReplicaState::Suspect {
            // Transition errors here just mean the replica moved on
            // (e.g. was evicted) between snapshot and probe result.
            let _ = self.topology.mark_healthy(replica.id);
        }
    }

    /// Record one probe failure. Also the router's fast-path hint after a
    /// forwarding failure.
    pub fn record_failure(&self, id: ReplicaId) {
        let count = {
            let mut entry = self.failures.entry(id).or_insert(0);
            *entry += 1;
            *entry
        };

        if count >= self.failure_threshold {
            self.failures.remove(&id);
            warn!(id = %id, consecutive = count, "failure threshold reached, reporting dead");
            if self.dead_tx.try_send(id).is_err() {
                // Channel full or supervisor gone; the next probe cycle
                // re-detects the failure.
                warn!(id = %id, "could not deliver death report");
            }
        } else {
            debug!(id = %id, consecutive = count, "probe failure recorded");
            let _ = self.topology.mark_suspect(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::fake::FakeOrchestrator;
    use corelib::ReplicaState;

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

    struct Fixture {
        topology: Arc<Topology>,
        orchestrator: Arc<FakeOrchestrator>,
        monitor: HealthMonitor,
        dead_rx: mpsc::Receiver<ReplicaId>,
    }

    fn setup(replicas: &[&str]) -> Fixture {
        let topology = Arc::new(Topology::new());
        let orchestrator = Arc::new(FakeOrchestrator::new());
        for (i, name) in replicas.iter().enumerate() {
            let id = ReplicaId(i as u64 + 1);
            let replica = Replica::new(id, *name, format!("{}:5000", name), 4);
            topology.register(replica).unwrap();
            topology.promote(id).unwrap();
            orchestrator.revive(name);
        }
        let (dead_tx, dead_rx) = mpsc::channel(16);
        let monitor = HealthMonitor::new(
            topology.clone(),
            orchestrator.clone(),
            &test_config(),
            dead_tx,
        );
        Fixture {
            topology,
            orchestrator,
            monitor,
            dead_rx,
        }
    }

    fn state_of(topology: &Topology, id: ReplicaId) -> ReplicaState {
        topology
            .replicas()
            .into_iter()
            .find(|r| r.id == id)
            .unwrap()
            .state
    }

    #[tokio::test]
    async fn test_three_consecutive_failures_report_dead() {
        let mut fx = setup(&["a", "b"]);
        fx.orchestrator.kill("a");

        for _ in 0..3 {
            fx.monitor.run_probe_cycle().await;
        }

        assert_eq!(fx.dead_rx.try_recv().unwrap(), ReplicaId(1));
        // The healthy neighbor was never reported.
        assert!(fx.dead_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_success_resets_hysteresis() {
        let mut fx = setup(&["a"]);

        // Two failures, then recovery: never reaches the threshold.
        fx.orchestrator.kill("a");
        fx.monitor.run_probe_cycle().await;
        fx.monitor.run_probe_cycle().await;
        assert_eq!(state_of(&fx.topology, ReplicaId(1)), ReplicaState::Suspect);

        fx.orchestrator.revive("a");
        fx.monitor.run_probe_cycle().await;
        assert_eq!(state_of(&fx.topology, ReplicaId(1)), ReplicaState::Healthy);

        // Two more failures still do not kill it; the counter restarted.
        fx.orchestrator.kill("a");
        fx.monitor.run_probe_cycle().await;
        fx.monitor.run_probe_cycle().await;
        assert!(fx.dead_rx.try_recv().is_err(), "replica must not be declared dead");
    }

    #[tokio::test]
    async fn test_suspect_replica_stays_routable() {
        let mut fx = setup(&["a"]);
        fx.orchestrator.kill("a");
        fx.monitor.run_probe_cycle().await;

        assert_eq!(state_of(&fx.topology, ReplicaId(1)), ReplicaState::Suspect);
        assert!(fx.topology.lookup(b"key").is_ok(), "hysteresis must not evict");
        assert!(fx.dead_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recovery_after_undeliverable_death_report() {
        let topology = Arc::new(Topology::new());
        let orchestrator = Arc::new(FakeOrchestrator::new());
        let replica = Replica::new(ReplicaId(1), "a", "a:5000".to_string(), 4);
        topology.register(replica).unwrap();
        topology.promote(ReplicaId(1)).unwrap();
        orchestrator.revive("a");

        // A full channel makes the death report at the threshold undeliverable.
        let (dead_tx, _dead_rx) = mpsc::channel(1);
        dead_tx.try_send(ReplicaId(99)).unwrap();
        let monitor = HealthMonitor::new(
            topology.clone(),
            orchestrator.clone(),
            &test_config(),
            dead_tx,
        );

        orchestrator.kill("a");
        for _ in 0..3 {
            monitor.run_probe_cycle().await;
        }
        assert_eq!(state_of(&topology, ReplicaId(1)), ReplicaState::Suspect);
        assert!(monitor.failures.get(&ReplicaId(1)).is_none(), "counter cleared at threshold");

        // The replica comes back before the next probe; it must not be
        // stuck in Suspect just because its counter is gone.
        orchestrator.revive("a");
        monitor.run_probe_cycle().await;
        assert_eq!(state_of(&topology, ReplicaId(1)), ReplicaState::Healthy);
    }

    #[tokio::test]
    async fn test_eviction_clears_failure_counter() {
        let fx = setup(&["a", "b"]);

        fx.monitor.record_failure(ReplicaId(1));
        fx.monitor.record_failure(ReplicaId(1));
        assert!(fx.monitor.failures.get(&ReplicaId(1)).is_some());

        fx.topology.evict(ReplicaId(1)).unwrap();
        fx.monitor.run_probe_cycle().await;

        assert!(
            fx.monitor.failures.get(&ReplicaId(1)).is_none(),
            "evicted replicas leave no residual counter"
        );
    }

    #[tokio::test]
    async fn test_router_hint_counts_as_probe_failure() {
        let mut fx = setup(&["a"]);

        fx.monitor.record_failure(ReplicaId(1));
        fx.monitor.record_failure(ReplicaId(1));
        fx.monitor.record_failure(ReplicaId(1));

        assert_eq!(fx.dead_rx.try_recv().unwrap(), ReplicaId(1));
    }
}
