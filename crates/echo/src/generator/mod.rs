//! Echo traffic generator.
//!
//! In HTTP mode the generator runs `parallelism` independent workers, each
//! posting random payloads at the configured rate and checking that the
//! responder echoes every byte. In stream mode it keeps one duplex connection
//! open, writing random chunks while a sibling task reads the echo back, and
//! compares the two logs once the exchange ends.
//!
//! Transport failures are fatal for the run. The only exception is the stream
//! mode's bounded reconnect, which redials at most once after a failure on an
//! established connection.

mod http;
mod stats;
mod stream;

pub use stats::{GeneratorReport, GeneratorStats};

use crate::{EchoError, GeneratorConfig, PayloadBufferPool, TransportMode};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Drives echo traffic against one responder.
pub struct EchoGenerator {
    config: GeneratorConfig,
    pool: Arc<PayloadBufferPool>,
    stats: Arc<GeneratorStats>,
}

impl EchoGenerator {
    /// Validate `config` and prepare a generator.
    pub fn new(config: GeneratorConfig) -> Result<Self, EchoError> {
        config.validate()?;
        let pool = Arc::new(PayloadBufferPool::new(config.parallelism));
        Ok(Self {
            config,
            pool,
            stats: Arc::new(GeneratorStats::new()),
        })
    }

    /// Live counters; readable while [`run`](Self::run) is in progress.
    pub fn stats(&self) -> &Arc<GeneratorStats> {
        &self.stats
    }

    /// Generate traffic until `cancel` fires, a configured limit is reached,
    /// or an unrecoverable error occurs.
    ///
    /// The report is logged in every case; it is returned only on success.
    pub async fn run(&self, cancel: CancellationToken) -> Result<GeneratorReport, EchoError> {
        info!(
            server = %self.config.server_addr,
            mode = %self.config.mode,
            identity = %self.config.identity,
            parallelism = self.config.parallelism,
            requests_per_second = self.config.requests_per_second,
            "Starting echo generator"
        );

        let started = Instant::now();
        let result = match self.config.mode {
            TransportMode::Http => {
                http::run(&self.config, &self.pool, &self.stats, cancel).await
            }
            TransportMode::Stream => stream::run(&self.config, &self.stats, cancel).await,
        };

        let report = self.stats.report(started.elapsed());
        report.log();
        result.map(|()| report)
    }
}

/// Compare an echo with what was sent.
pub(crate) fn verify_echo(sent: &[u8], received: &[u8]) -> Result<(), EchoError> {
    if sent == received {
        return Ok(());
    }
    let first_mismatch = sent
        .iter()
        .zip(received)
        .position(|(a, b)| a != b)
        .or_else(|| Some(sent.len().min(received.len())));
    Err(EchoError::Verification {
        sent: sent.len(),
        received: received.len(),
        first_mismatch,
    })
}
