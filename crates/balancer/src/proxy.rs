//! Router: resolve a routing key to a replica and forward the request.
//!
//! Retry policy: on a connection-level failure (refused/timeout) against the
//! resolved replica, the failure is reported to the health monitor as one
//! probe-failure hint and the request is retried exactly once against the
//! next distinct replica clockwise on the ring. Any further failure is
//! surfaced to the client. HTTP-level errors from the replica (4xx/5xx
//! responses) are proxied verbatim, never retried.

use crate::error::{BalancerError, Result};
use crate::health::HealthMonitor;
use corelib::{Replica, Topology};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Router {
    topology: Arc<Topology>,
    health: Arc<HealthMonitor>,
    http: reqwest::Client,
    forward_timeout: Duration,
}

/// A proxied backend response.
///
/// Carries the complete backend header map so the HTTP surface can forward
/// the response verbatim; hop-by-hop headers are stripped at that boundary,
/// not here.
#[derive(Debug)]
pub struct RoutedResponse {
    /// The replica that actually served the request.
    pub replica: Replica,
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: Vec<u8>,
}

impl Router {
    pub fn new(
        topology: Arc<Topology>,
        health: Arc<HealthMonitor>,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            topology,
            health,
            http: reqwest::Client::new(),
            forward_timeout,
        }
    }

    /// Which replica owns this key right now.
    pub fn resolve(&self, key: &[u8]) -> Result<Replica> {
        Ok(self.topology.lookup(key)?)
    }

    /// Resolve `key` and forward a GET for `path` to the owning replica.
    pub async fn route(&self, key: &[u8], path: &str) -> Result<RoutedResponse> {
        let primary = self.resolve(key)?;
        match self.forward(&primary, path).await {
            Ok(response) => Ok(response),
            Err(err) if err.is_connect() || err.is_timeout() => {
                warn!(replica = %primary.name, error = %err, "forward failed, hinting monitor");
                self.health.record_failure(primary.id);

                match self.topology.lookup_successor(key, primary.id) {
                    Some(fallback) => {
                        debug!(replica = %fallback.name, "retrying against ring successor");
                        Ok(self.forward(&fallback, path).await?)
                    }
                    None => Err(BalancerError::Upstream(err)),
                }
            }
            Err(err) => Err(BalancerError::Upstream(err)),
        }
    }

    async fn forward(
        &self,
        replica: &Replica,
        path: &str,
    ) -> std::result::Result<RoutedResponse, reqwest::Error> {
        let url = format!(
            "http://{}/{}",
            replica.address,
            path.trim_start_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .timeout(self.forward_timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(RoutedResponse {
            replica: replica.clone(),
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::orchestrator::fake::FakeOrchestrator;
    use corelib::{ReplicaId, Topology};
    use tokio::sync::mpsc;

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

    fn monitor(topology: &Arc<Topology>) -> (Arc<HealthMonitor>, mpsc::Receiver<ReplicaId>) {
        let (dead_tx, dead_rx) = mpsc::channel(16);
        let monitor = HealthMonitor::new(
            topology.clone(),
            Arc::new(FakeOrchestrator::new()),
            &test_config(),
            dead_tx,
        );
        (Arc::new(monitor), dead_rx)
    }

    fn add_replica(topology: &Topology, id: u64, name: &str, address: String) {
        let rid = ReplicaId(id);
        topology
            .register(Replica::new(rid, name, address, 8))
            .unwrap();
        topology.promote(rid).unwrap();
    }

    async fn spawn_backend() -> std::net::SocketAddr {
        use axum::routing::get;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/hello",
            get(|| async {
                (
                    [
                        ("x-served-by", "backend-1"),
                        ("cache-control", "max-age=60"),
                    ],
                    "hi from backend",
                )
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_empty_ring_surfaces_error() {
        let topology = Arc::new(Topology::new());
        let (health, _dead_rx) = monitor(&topology);
        let router = Router::new(topology, health, Duration::from_secs(1));

        let err = router.route(b"any-key", "/hello").await.unwrap_err();
        assert!(matches!(err, BalancerError::EmptyRing));
    }

    #[tokio::test]
    async fn test_forwards_to_resolved_replica() {
        let backend = spawn_backend().await;
        let topology = Arc::new(Topology::new());
        add_replica(&topology, 1, "only", backend.to_string());
        let (health, _dead_rx) = monitor(&topology);
        let router = Router::new(topology, health, Duration::from_secs(1));

        let response = router.route(b"some-key", "/hello").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.replica.id, ReplicaId(1));
        assert_eq!(response.body, b"hi from backend");
    }

    #[tokio::test]
    async fn test_backend_headers_carried_in_full() {
        let backend = spawn_backend().await;
        let topology = Arc::new(Topology::new());
        add_replica(&topology, 1, "only", backend.to_string());
        let (health, _dead_rx) = monitor(&topology);
        let router = Router::new(topology, health, Duration::from_secs(1));

        let response = router.route(b"some-key", "/hello").await.unwrap();
        assert_eq!(
            response.headers.get("x-served-by").unwrap(),
            "backend-1",
            "custom backend headers must survive forwarding"
        );
        assert_eq!(response.headers.get("cache-control").unwrap(), "max-age=60");
        assert!(response.headers.get(reqwest::header::CONTENT_TYPE).is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_retries_successor_and_hints_monitor() {
        let backend = spawn_backend().await;
        let topology = Arc::new(Topology::new());
        // Replica 1 points at a port nothing listens on.
        add_replica(&topology, 1, "dead", "127.0.0.1:1".to_string());
        add_replica(&topology, 2, "live", backend.to_string());
        let (health, mut dead_rx) = monitor(&topology);
        let router = Router::new(topology.clone(), health, Duration::from_secs(1));

        // Find a key owned by the dead replica.
        let key = (0..10_000u32)
            .map(|i| format!("key-{}", i))
            .find(|k| topology.lookup(k.as_bytes()).unwrap().id == ReplicaId(1))
            .expect("some key must map to the dead replica");

        let response = router.route(key.as_bytes(), "/hello").await.unwrap();
        assert_eq!(response.replica.id, ReplicaId(2), "served by the ring successor");
        assert_eq!(response.status, 200);

        // Each failed forward counts as one probe failure; three of them
        // push the dead replica over the default threshold.
        router.route(key.as_bytes(), "/hello").await.unwrap();
        router.route(key.as_bytes(), "/hello").await.unwrap();
        assert_eq!(dead_rx.try_recv().unwrap(), ReplicaId(1));
    }
}
