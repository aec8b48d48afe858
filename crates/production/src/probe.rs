//! Probe and metrics HTTP server.
//!
//! Serves three routes, none of which touch the echo traffic path:
//!
//! - `GET /health`: liveness, always 200 while the process runs.
//! - `GET /ready`: 200 once the responder is accepting traffic, 503 before.
//! - `GET /metrics`: accumulated traffic counters in Prometheus text format.

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use taler_echo::Readiness;
use taler_metrics::PrometheusTrafficRecorder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared state for probe handlers.
#[derive(Clone)]
pub struct ProbeState {
    pub readiness: Readiness,
    pub recorder: Arc<PrometheusTrafficRecorder>,
}

/// Response body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Response body of `GET /ready`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub ready: bool,
}

/// Create the probe router.
pub fn create_router(state: ProbeState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn ready_handler(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.readiness.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready".to_string(),
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not_ready".to_string(),
                ready: false,
            }),
        )
    }
}

async fn metrics_handler(State(state): State<ProbeState>) -> Response {
    match state.recorder.encode() {
        Ok((content_type, buffer)) => ([(CONTENT_TYPE, content_type)], buffer).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// A bound probe server.
pub struct ProbeServer {
    listener: TcpListener,
    state: ProbeState,
}

impl ProbeServer {
    /// Bind the probe listener.
    pub async fn bind(addr: SocketAddr, state: ProbeState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Probe server listening");
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) -> std::io::Result<()> {
        let router = create_router(self.state);
        axum::serve(self.listener, router)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use taler_metrics::{Protocol, TrafficRecord, TrafficRecorder};
    use taler_types::PeerIdentity;
    use tower::ServiceExt;

    fn test_state() -> ProbeState {
        ProbeState {
            readiness: Readiness::new(),
            recorder: Arc::new(PrometheusTrafficRecorder::new().unwrap()),
        }
    }

    async fn send(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_router_health() {
        let response = send(create_router(test_state()), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_router_ready_follows_flag() {
        let state = test_state();
        let app = create_router(state.clone());

        let response = send(app.clone(), "/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.readiness.mark_ready();
        let response = send(app, "/ready").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let ready: ReadyResponse = serde_json::from_slice(&body).unwrap();
        assert!(ready.ready);
    }

    #[tokio::test]
    async fn test_router_metrics() {
        let state = test_state();
        let source = PeerIdentity::new("us-east-1b", "client-0");
        let target = PeerIdentity::new("us-east-1a", "server-0");
        state.recorder.record(TrafficRecord {
            success: true,
            protocol: Protocol::Http,
            source: &source,
            target: &target,
            bytes: 2048,
        });

        let response = send(create_router(state), "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("traffic_total{"));
        assert!(text.contains("source_az=\"us-east-1b\""));
        assert!(text.contains("2048"));
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let server = ProbeServer::bind("127.0.0.1:0".parse().unwrap(), test_state())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(server.serve(cancel.clone()));
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
