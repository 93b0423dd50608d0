//! Management and routing HTTP surface.
//!
//! - `GET /rep` — replica list and ring size (observability)
//! - `GET /home` — resolves the caller's generated key, reports the replica
//! - `POST /add {count, hints?}` — scale up by `count`
//! - `DELETE /rm {count, hints?}` — scale down by `count`
//! - any other GET — proxied to the owning replica via the router
//!
//! Every response uses the `{"message": ..., "status": "successful"|"failure"}`
//! envelope the backend fleet's tooling expects.

use crate::error::BalancerError;
use crate::proxy::Router as RequestRouter;
use crate::supervisor::ReplicaSupervisor;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use corelib::{Replica, Topology};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    topology: Arc<Topology>,
    supervisor: Arc<ReplicaSupervisor>,
    router: Arc<RequestRouter>,
    request_seq: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        topology: Arc<Topology>,
        supervisor: Arc<ReplicaSupervisor>,
        router: Arc<RequestRouter>,
    ) -> Self {
        Self {
            topology,
            supervisor,
            router,
            request_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Per-request routing key: sequence counter plus a timestamp component,
    /// so bare requests spread across the keyspace.
    fn next_request_key(&self) -> String {
        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed);
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or(0);
        format!("{}_{}", seq, micros)
    }
}

/// Build the HTTP surface.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/rep", get(get_replicas))
        .route("/home", get(home))
        .route("/add", post(add_replicas))
        .route("/rm", delete(remove_replicas))
        .fallback(get(proxy_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ScaleRequest {
    count: usize,
    #[serde(default)]
    hints: Vec<String>,
}

fn replica_json(replica: &Replica) -> serde_json::Value {
    json!({
        "id": replica.id,
        "name": replica.name,
        "address": replica.address,
        "state": replica.state,
    })
}

fn pool_message(replicas: &[Replica], ring_size: usize) -> serde_json::Value {
    json!({
        "N": replicas.len(),
        "replicas": replicas.iter().map(replica_json).collect::<Vec<_>>(),
        "ring_size": ring_size,
    })
}

fn success(message: serde_json::Value) -> Json<serde_json::Value> {
    Json(json!({ "message": message, "status": "successful" }))
}

impl IntoResponse for BalancerError {
    fn into_response(self) -> Response {
        let status = match &self {
            BalancerError::EmptyRing => StatusCode::SERVICE_UNAVAILABLE,
            BalancerError::InsufficientReplicas { .. } | BalancerError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            BalancerError::OrchestratorFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BalancerError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(json!({
            "message": format!("<Error> {}", self),
            "status": "failure",
        }));
        (status, body).into_response()
    }
}

async fn get_replicas(State(state): State<AppState>) -> impl IntoResponse {
    let replicas = state.topology.replicas();
    let ring_size = state.topology.ring_size();
    success(pool_message(&replicas, ring_size))
}

async fn home(State(state): State<AppState>) -> Result<impl IntoResponse, BalancerError> {
    let key = state.next_request_key();
    let replica = state.router.resolve(key.as_bytes())?;
    Ok(success(json!({
        "text": format!("Hello from {}", replica.name),
        "replica": replica_json(&replica),
    })))
}

async fn add_replicas(
    State(state): State<AppState>,
    Json(request): Json<ScaleRequest>,
) -> Result<impl IntoResponse, BalancerError> {
    let replicas = state.supervisor.scale_up(request.count, request.hints).await?;
    let ring_size = state.topology.ring_size();
    Ok(success(pool_message(&replicas, ring_size)))
}

async fn remove_replicas(
    State(state): State<AppState>,
    Json(request): Json<ScaleRequest>,
) -> Result<impl IntoResponse, BalancerError> {
    let replicas = state
        .supervisor
        .scale_down(request.count, request.hints)
        .await?;
    let ring_size = state.topology.ring_size();
    Ok(success(pool_message(&replicas, ring_size)))
}

/// Connection-scoped headers that must not be forwarded (RFC 9110 §7.6.1),
/// plus framing headers axum recomputes for the outgoing body.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

/// Forwarded application paths: resolve a generated key, proxy the backend
/// response verbatim (status, headers, body).
async fn proxy_request(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<Response, BalancerError> {
    let key = state.next_request_key();
    let routed = state.router.route(key.as_bytes(), uri.path()).await?;

    let status =
        StatusCode::from_u16(routed.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, routed.body).into_response();
    // The forwarder and the surface are on different http major versions, so
    // headers cross the boundary as raw bytes.
    let headers = response.headers_mut();
    headers.remove(header::CONTENT_TYPE);
    for (name, value) in routed.headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::from_bytes(name.as_str().as_bytes()),
            header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    Ok(response)
}
