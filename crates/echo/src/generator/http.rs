//! HTTP workers.

use super::{verify_echo, GeneratorStats};
use crate::responder::BANNER_PREFIX;
use crate::{EchoError, GeneratorConfig, PayloadBufferPool};
use bytes::Bytes;
use rand::RngCore;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taler_types::{AVAILABILITY_ZONE_HEADER, POD_NAME_HEADER};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Run `config.parallelism` workers until cancellation or the first error.
///
/// The first worker error cancels the rest and is returned once they have
/// all stopped.
pub(super) async fn run(
    config: &GeneratorConfig,
    pool: &Arc<PayloadBufferPool>,
    stats: &Arc<GeneratorStats>,
    cancel: CancellationToken,
) -> Result<(), EchoError> {
    let client = reqwest::Client::builder()
        .timeout(config.operation_timeout)
        .build()
        .map_err(|e| EchoError::Http(e.to_string()))?;

    let workers_cancel = cancel.child_token();
    let mut workers = JoinSet::new();
    for id in 0..config.parallelism {
        let worker = Worker {
            id,
            client: client.clone(),
            url: config.echo_url(),
            config: config.clone(),
            pool: Arc::clone(pool),
            stats: Arc::clone(stats),
        };
        workers.spawn(worker.run(workers_cancel.clone()));
    }

    let mut first_error = None;
    while let Some(joined) = workers.join_next().await {
        let outcome = joined.map_err(EchoError::from).and_then(|result| result);
        if let Err(e) = outcome {
            if first_error.is_none() {
                error!(error = %e, "Worker failed, stopping the remaining workers");
                workers_cancel.cancel();
                first_error = Some(e);
            } else {
                debug!(error = %e, "Additional worker failure");
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Result of one verified exchange.
#[derive(Debug)]
struct Exchange {
    status: StatusCode,
    sent: usize,
    received: usize,
}

struct Worker {
    id: usize,
    client: reqwest::Client,
    url: String,
    config: GeneratorConfig,
    pool: Arc<PayloadBufferPool>,
    stats: Arc<GeneratorStats>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) -> Result<(), EchoError> {
        let period = self.config.pacing_period();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // An exchange in flight always completes; cancellation is checked
            // between exchanges and while pacing.
            let started = Instant::now();
            let exchange = self.exchange().await?;
            let latency = started.elapsed();
            let success = exchange.status == StatusCode::OK;
            self.stats.record_exchange(
                success,
                exchange.sent as u64,
                exchange.received as u64,
                latency,
            );
            trace!(
                worker = self.id,
                status = exchange.status.as_u16(),
                bytes = exchange.sent,
                latency_ms = latency.as_millis() as u64,
                "Exchange complete"
            );

            // A simulated failure already carries the responder's delay.
            if !success {
                continue;
            }

            if let Some(period) = period {
                let remaining = period.saturating_sub(started.elapsed());
                if !remaining.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(remaining) => {}
                    }
                }
            }
        }

        debug!(worker = self.id, "Worker stopped");
        Ok(())
    }

    /// Send one random payload and verify the echo.
    async fn exchange(&self) -> Result<Exchange, EchoError> {
        let size = self.config.payload.sample(&mut rand::thread_rng());
        let mut buffer = self.pool.acquire(size);
        buffer.resize(size, 0);
        rand::thread_rng().fill_bytes(&mut buffer[..]);
        let payload = buffer.freeze();

        let result = self.send(payload.clone()).await;

        match payload.try_into_mut() {
            Ok(buffer) => self.pool.release(buffer),
            Err(_) => trace!(worker = self.id, "Payload still referenced, not pooled"),
        }
        result
    }

    async fn send(&self, payload: Bytes) -> Result<Exchange, EchoError> {
        let sent = payload.len();
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(AVAILABILITY_ZONE_HEADER, self.config.identity.zone.as_str())
            .header(POD_NAME_HEADER, self.config.identity.pod.as_str())
            .body(payload.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        match split_banner(&body) {
            Some((zone, echoed)) => {
                verify_echo(&payload, echoed)?;
                debug!(
                    worker = self.id,
                    server_zone = zone,
                    status = status.as_u16(),
                    bytes = sent,
                    "Echo verified"
                );
            }
            None if status == StatusCode::OK => {
                return Err(EchoError::Http(
                    "response is missing the zone banner".to_string(),
                ));
            }
            None => {
                warn!(
                    worker = self.id,
                    status = status.as_u16(),
                    body = %String::from_utf8_lossy(&body),
                    "Responder returned an error without echoing"
                );
            }
        }

        Ok(Exchange {
            status,
            sent,
            received: body.len(),
        })
    }

    fn classify(&self, error: reqwest::Error) -> EchoError {
        classify(&self.url, self.config.operation_timeout, error)
    }
}

/// Map a client error onto the generator's error kinds.
fn classify(url: &str, timeout: Duration, error: reqwest::Error) -> EchoError {
    if error.is_timeout() {
        EchoError::DeadlineExceeded {
            operation: "http exchange",
            timeout,
        }
    } else if error.is_connect() {
        EchoError::Dial {
            addr: url.to_string(),
            reason: error.to_string(),
        }
    } else if error.is_builder() {
        EchoError::Http(error.to_string())
    } else {
        EchoError::Io(io::Error::other(error))
    }
}

/// Split `az: <zone>\n<payload>` into the zone and the payload.
fn split_banner(body: &[u8]) -> Option<(&str, &[u8])> {
    let end = body.iter().position(|&b| b == b'\n')?;
    let line = std::str::from_utf8(&body[..end]).ok()?;
    let zone = line.strip_prefix(BANNER_PREFIX)?;
    Some((zone, &body[end + 1..]))
}
