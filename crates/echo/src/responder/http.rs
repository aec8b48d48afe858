//! HTTP echo endpoint.

use super::ResponderState;
use crate::{EchoError, Readiness};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::BytesMut;
use futures::StreamExt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Instant;
use taler_metrics::{ExchangeTraffic, Protocol};
use taler_types::{PeerIdentity, AVAILABILITY_ZONE_HEADER, POD_NAME_HEADER};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Route of the echo endpoint.
pub const ECHO_PATH: &str = "/echo";

/// Prefix of the zone banner line that precedes the echoed payload.
pub const BANNER_PREFIX: &str = "az: ";

pub(crate) fn echo_router(state: Arc<ResponderState>) -> Router {
    Router::new()
        .route(ECHO_PATH, post(echo_handler))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

pub(super) async fn serve(
    listener: TcpListener,
    state: Arc<ResponderState>,
    readiness: Readiness,
    cancel: CancellationToken,
) -> Result<(), EchoError> {
    let grace = state.config.shutdown_grace;
    let router = echo_router(state);

    readiness.mark_ready();
    info!("Echo responder accepting requests");

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result.map_err(EchoError::from),
        _ = cancel.cancelled() => {
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result.map_err(EchoError::from),
                Err(_) => {
                    warn!(grace = ?grace, "In-flight exchanges did not finish before the grace period");
                    Ok(())
                }
            }
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Drain the request body. The flag is false if the client went away early.
async fn drain_body(body: Body) -> (BytesMut, bool) {
    let mut stream = body.into_data_stream();
    let mut payload = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => payload.extend_from_slice(&chunk),
            Err(e) => {
                warn!(error = %e, "Error reading request body");
                return (payload, false);
            }
        }
    }
    (payload, true)
}

async fn echo_handler(
    State(state): State<Arc<ResponderState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let client = PeerIdentity::new(
        header_value(&headers, AVAILABILITY_ZONE_HEADER),
        header_value(&headers, POD_NAME_HEADER),
    );
    let server = &state.config.identity;
    let started = Instant::now();

    let outcome = {
        let mut rng = rand::thread_rng();
        state.table.sample_outcome(&server.zone, &mut rng)
    };
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(client = %client, error = %e, "Error sampling outcome code");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let (payload, complete) = drain_body(body).await;
    if outcome.is_failure() {
        tokio::time::sleep(state.config.failure_delay).await;
    }

    let echoed = payload.len() as u64;
    ExchangeTraffic {
        protocol: Protocol::Http,
        client: &client,
        server,
        success: complete && !outcome.is_failure(),
        client_to_server: echoed,
        server_to_client: echoed,
    }
    .record(state.recorder.as_ref(), state.config.traffic_multiplier);

    info!(
        client = %client,
        bytes = echoed,
        status_code = outcome.as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Done echoing data"
    );

    let banner = format!("{BANNER_PREFIX}{}\n", server.zone);
    let mut response = BytesMut::with_capacity(banner.len() + payload.len());
    response.extend_from_slice(banner.as_bytes());
    response.extend_from_slice(&payload);

    let status =
        StatusCode::from_u16(outcome.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(CONTENT_TYPE, "application/octet-stream")],
        response.freeze(),
    )
        .into_response()
}
